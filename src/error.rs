use std::fmt;

use thiserror::Error;

/// A scope or identity contract violation with details about what failed.
///
/// Every variant is a programmer error on the caller's side. Nothing in this
/// crate retries or swallows a `ScopeError`; it is returned synchronously.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ScopeError {
    /// The kind of violation that occurred
    pub kind: ScopeErrorKind,
    /// Human-readable message explaining the violation
    pub message: String,
}

impl ScopeError {
    /// Creates a new error.
    pub fn new(kind: ScopeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ScopeErrorKind::InvalidArgument, message)
    }

    pub(crate) fn out_of_scope() -> Self {
        Self::new(
            ScopeErrorKind::OutOfScope,
            "Cannot access scoped object: no request context is active on this thread",
        )
    }

    pub(crate) fn already_active() -> Self {
        Self::new(
            ScopeErrorKind::IllegalState,
            "Cannot continue request, thread already has request in progress. \
             A new thread must be used to propagate the request scope context.",
        )
    }

    pub(crate) fn interrupted() -> Self {
        Self::new(
            ScopeErrorKind::Interrupted,
            "Request work interrupted: a started future was resumed on a thread \
             that already has request in progress; its earlier polls have run.",
        )
    }
}

/// The kind of scope violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeErrorKind {
    /// A value handed to a constructor broke its contract (e.g. empty identifier)
    InvalidArgument,
    /// Propagation was attempted from a thread with no active context
    OutOfScope,
    /// A context was installed on a thread that already had one
    IllegalState,
    /// A started future was resumed on a thread that already had a context
    Interrupted,
    /// A worker thread for propagated work could not be started
    Spawn,
}

impl fmt::Display for ScopeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeErrorKind::InvalidArgument => write!(f, "Invalid argument"),
            ScopeErrorKind::OutOfScope => write!(f, "Out of scope"),
            ScopeErrorKind::IllegalState => write!(f, "Illegal state"),
            ScopeErrorKind::Interrupted => write!(f, "Interrupted"),
            ScopeErrorKind::Spawn => write!(f, "Spawn failed"),
        }
    }
}
