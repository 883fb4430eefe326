use std::collections::HashMap;

use crate::identity::AuthUser;

/// Request-scoped state carried by a thread while it serves one request.
///
/// Holds the request identifier, the authenticated user (if any) and a cache
/// of values computed while serving the request. The cache belongs to the
/// originating thread only; [`continuing`](Self::continuing) drops it.
///
/// # Examples
///
/// ```
/// use request_scope::{AuthUser, RequestContext};
///
/// let user = AuthUser::from_parts("ldap:alice", Some("alice")).unwrap();
/// let mut ctx = RequestContext::new("req-17").with_user(user.clone());
/// ctx.set_scoped("visible_changes", "42");
///
/// let continued = ctx.continuing();
/// assert_eq!(continued.request_id(), "req-17");
/// assert_eq!(continued.user(), Some(&user));
/// assert_eq!(continued.scoped("visible_changes"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    request_id: String,
    user: Option<AuthUser>,
    scoped: HashMap<String, String>,
}

impl RequestContext {
    /// Creates a context for an anonymous request.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            user: None,
            scoped: HashMap::new(),
        }
    }

    /// Attaches the user the request is executed for.
    pub fn with_user(mut self, user: AuthUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Returns the request ID for this context.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns the authenticated user, or `None` for anonymous requests.
    pub fn user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    /// Returns a request-scoped cached value.
    pub fn scoped(&self, key: &str) -> Option<&str> {
        self.scoped.get(key).map(String::as_str)
    }

    /// Caches a value for the rest of this request.
    pub fn set_scoped(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.scoped.insert(key.into(), value.into());
    }

    /// Returns a copy of this context without any request-scoped values.
    ///
    /// Usable directly as a continuation strategy:
    /// `ScopePropagator::new(slot, RequestContext::continuing)`.
    pub fn continuing(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            user: self.user.clone(),
            scoped: HashMap::new(),
        }
    }
}
