//! Request-scoped context propagation across threads.
//!
//! A server handling a request keeps that request's context (who the caller
//! is, which request this is, per-request caches) in a thread-bound slot.
//! When part of the work moves to another thread, this crate hands over a
//! consistent snapshot of the context while guaranteeing that:
//! - a thread never holds two contexts at once
//! - the borrowed context is removed again however the work ends
//!
//! # Core Types
//!
//! - [`UserUuid`]: Backend-agnostic identifier of an authenticated principal
//! - [`AuthUser`]: Authenticated principal with an optional username
//! - [`ContextSlot`]: Per-thread storage for the active context
//! - [`ThreadLocalSlot`]: `thread_local!`-backed slot
//! - [`SlotGuard`]: RAII installation of a context in a slot
//! - [`Continuation`]: Strategy deriving a thread-safe snapshot of a context
//! - [`ScopePropagator`]: Wraps work (or futures) with a context snapshot
//! - [`RequestContext`]: Ready-made context payload carrying an [`AuthUser`]
//!
//! # Examples
//!
//! ```
//! use std::cell::RefCell;
//! use request_scope::{
//!     AuthUser, ContextSlot, RequestContext, ScopeError, ScopePropagator, ThreadLocalSlot,
//! };
//!
//! thread_local! {
//!     static REQUEST: RefCell<Option<RequestContext>> = const { RefCell::new(None) };
//! }
//!
//! let slot = ThreadLocalSlot::new(&REQUEST);
//! let propagator = ScopePropagator::new(slot, RequestContext::continuing);
//!
//! let alice = AuthUser::from_parts("ldap:alice", Some("alice")).unwrap();
//! let _request = slot.enter(RequestContext::new("req-1").with_user(alice)).unwrap();
//!
//! let handle = propagator
//!     .spawn(move || {
//!         let name = slot.with_active(|ctx| {
//!             ctx.and_then(RequestContext::user)
//!                 .and_then(AuthUser::username)
//!                 .map(str::to_owned)
//!         });
//!         Ok::<_, ScopeError>(name)
//!     })
//!     .unwrap();
//!
//! assert_eq!(handle.join().unwrap().unwrap().as_deref(), Some("alice"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod continuation;
mod error;
mod future;
mod identity;
mod propagator;
mod request;
mod slot;

pub use continuation::{CloneContinuation, Continuation};
pub use error::{ScopeError, ScopeErrorKind};
pub use future::PropagatedFuture;
pub use identity::{AuthUser, UserUuid};
pub use propagator::{Propagated, PropagatorBuilder, ScopePropagator};
pub use request::RequestContext;
pub use slot::{ContextSlot, SlotGuard, ThreadLocalSlot};
