//! Backend-agnostic identity of the principal a request runs for.
//!
//! An authentication backend produces an [`AuthUser`] once per successful
//! login. Both types are immutable; equality is by identifier only so that
//! access checks stay stable no matter which display name a backend reports.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::ScopeError;

/// Globally unique identifier for an authenticated user.
///
/// The value is opaque to this crate. Two identifiers are interchangeable if
/// and only if their underlying strings match.
///
/// # Examples
///
/// ```
/// use request_scope::UserUuid;
///
/// let a = UserUuid::new("ldap:alice").unwrap();
/// let b: UserUuid = "ldap:alice".parse().unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.get(), "ldap:alice");
///
/// assert!(UserUuid::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserUuid {
    uuid: String,
}

impl UserUuid {
    /// Wraps a backend-issued identifier.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidArgument` error if `uuid` is empty.
    pub fn new(uuid: impl Into<String>) -> Result<Self, ScopeError> {
        let uuid = uuid.into();
        if uuid.is_empty() {
            return Err(ScopeError::invalid_argument("uuid must not be empty"));
        }
        Ok(Self { uuid })
    }

    /// Returns the wrapped identifier.
    pub fn get(&self) -> &str {
        &self.uuid
    }
}

impl fmt::Display for UserUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserUuid[{}]", self.uuid)
    }
}

impl AsRef<str> for UserUuid {
    fn as_ref(&self) -> &str {
        &self.uuid
    }
}

impl FromStr for UserUuid {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserUuid {
    type Error = ScopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for UserUuid {
    type Error = ScopeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// An authenticated user as reported by an authentication backend.
///
/// The optional username is metadata: two `AuthUser`s with the same
/// [`UserUuid`] are the same principal even if their usernames differ.
///
/// # Examples
///
/// ```
/// use request_scope::{AuthUser, UserUuid};
///
/// let uuid = UserUuid::new("ldap:alice").unwrap();
/// let alice = AuthUser::new(uuid.clone(), Some("alice".to_string()));
/// let renamed = AuthUser::new(uuid, Some("alice.smith".to_string()));
///
/// assert_eq!(alice, renamed);
/// assert!(alice.has_username());
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    uuid: UserUuid,
    username: Option<String>,
}

impl AuthUser {
    /// Creates an authenticated user.
    pub fn new(uuid: UserUuid, username: Option<String>) -> Self {
        Self { uuid, username }
    }

    /// Creates an authenticated user from raw backend values.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidArgument` error if `uuid` is empty.
    pub fn from_parts(uuid: &str, username: Option<&str>) -> Result<Self, ScopeError> {
        Ok(Self::new(UserUuid::new(uuid)?, username.map(str::to_owned)))
    }

    /// Returns the globally unique identifier.
    pub fn uuid(&self) -> &UserUuid {
        &self.uuid
    }

    /// Returns the backend specific user name, if one exists.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns `true` if [`username`](Self::username) is present.
    pub fn has_username(&self) -> bool {
        self.username.is_some()
    }
}

impl PartialEq for AuthUser {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for AuthUser {}

impl Hash for AuthUser {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl fmt::Display for AuthUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(name) => write!(f, "AuthUser[uuid={}, username={}]", self.uuid, name),
            None => write!(f, "AuthUser[uuid={}, username=<none>]", self.uuid),
        }
    }
}
