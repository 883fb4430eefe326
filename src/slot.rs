//! The per-thread context slot and its RAII installation guard.
//!
//! A slot holds at most one active context for the thread that owns it:
//!
//! ```text
//! Empty --install--> Active --remove--> Empty
//! ```
//!
//! `Active --install--> Active` is forbidden and reported as `IllegalState`.
//! [`SlotGuard`] pairs every successful install with a removal on drop, so a
//! thread never stays `Active` after the scope that installed the context
//! ends, whether it returns normally, returns early with `?`, or unwinds.

use std::any::type_name;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::thread::LocalKey;

use crate::error::{ScopeError, ScopeErrorKind};

/// Storage for the context that is active on the calling thread.
///
/// Implementations only ever touch the calling thread's own slot, so no
/// locking is involved. Handles are cheap to clone and are moved into
/// propagated work so the executing thread can reach its own slot.
pub trait ContextSlot<C> {
    /// Runs `f` with the context active on the calling thread, if any.
    ///
    /// A slot that cannot be read right now (mutably borrowed, or already
    /// destroyed during thread teardown) reads as `None`.
    fn with_active<R>(&self, f: impl FnOnce(Option<&C>) -> R) -> R;

    /// Installs `ctx` as the active context on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an `IllegalState` error, leaving the existing context
    /// untouched, if the slot is already active.
    fn install(&self, ctx: C) -> Result<(), ScopeError>;

    /// Removes and returns the active context of the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be reached, e.g. while the thread
    /// is tearing down its thread-locals. The slot state after a failed
    /// removal is up to the implementation and may still be active;
    /// [`SlotGuard`] only logs the failure and leaves the result of the
    /// guarded work as it was.
    fn remove(&self) -> Result<Option<C>, ScopeError>;

    /// Returns `true` if a context is active on the calling thread.
    fn is_active(&self) -> bool {
        self.with_active(|ctx| ctx.is_some())
    }

    /// Returns a clone of the active context, if any.
    fn current(&self) -> Option<C>
    where
        C: Clone,
    {
        self.with_active(|ctx| ctx.cloned())
    }
}

/// A [`ContextSlot`] backed by a `thread_local!` cell.
///
/// # Examples
///
/// ```
/// use std::cell::RefCell;
/// use request_scope::{ContextSlot, ThreadLocalSlot};
///
/// thread_local! {
///     static CURRENT: RefCell<Option<String>> = const { RefCell::new(None) };
/// }
///
/// let slot = ThreadLocalSlot::new(&CURRENT);
/// {
///     let _guard = slot.enter("req-1".to_string()).unwrap();
///     assert_eq!(slot.current().as_deref(), Some("req-1"));
/// }
/// assert!(!slot.is_active());
/// ```
pub struct ThreadLocalSlot<C: 'static> {
    key: &'static LocalKey<RefCell<Option<C>>>,
}

impl<C: 'static> ThreadLocalSlot<C> {
    /// Wraps a thread-local cell declared by the integration.
    pub const fn new(key: &'static LocalKey<RefCell<Option<C>>>) -> Self {
        Self { key }
    }

    /// Installs `ctx` on the calling thread for the lifetime of the guard.
    ///
    /// This is how a request layer activates the original context when a
    /// request begins.
    ///
    /// # Errors
    ///
    /// Returns an `IllegalState` error if a context is already active.
    pub fn enter(&self, ctx: C) -> Result<SlotGuard<C, Self>, ScopeError> {
        SlotGuard::enter(*self, ctx)
    }
}

impl<C: 'static> Clone for ThreadLocalSlot<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: 'static> Copy for ThreadLocalSlot<C> {}

impl<C: 'static> fmt::Debug for ThreadLocalSlot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLocalSlot")
            .field("context", &type_name::<C>())
            .finish()
    }
}

impl<C: 'static> ContextSlot<C> for ThreadLocalSlot<C> {
    fn with_active<R>(&self, f: impl FnOnce(Option<&C>) -> R) -> R {
        let mut f = Some(f);
        let mut out = None;
        let _ = self.key.try_with(|cell| {
            if let Ok(active) = cell.try_borrow() {
                out = f.take().map(|f| f(active.as_ref()));
            }
        });
        match (out, f) {
            (Some(out), _) => out,
            (None, Some(f)) => f(None),
            (None, None) => unreachable!("`with_active` callback ran without a result"),
        }
    }

    fn install(&self, ctx: C) -> Result<(), ScopeError> {
        self.key.with(|cell| {
            let mut slot = cell.try_borrow_mut().map_err(|_| {
                ScopeError::new(
                    ScopeErrorKind::IllegalState,
                    "Cannot install request context while the slot is being read",
                )
            })?;
            if slot.is_some() {
                return Err(ScopeError::already_active());
            }
            *slot = Some(ctx);
            Ok(())
        })
    }

    fn remove(&self) -> Result<Option<C>, ScopeError> {
        match self.key.try_with(|cell| cell.try_borrow_mut().map(|mut slot| slot.take())) {
            Ok(Ok(previous)) => Ok(previous),
            Ok(Err(_)) => Err(ScopeError::new(
                ScopeErrorKind::IllegalState,
                "Cannot remove request context while the slot is being read",
            )),
            Err(_) => Err(ScopeError::new(
                ScopeErrorKind::IllegalState,
                "Cannot remove request context: thread-local storage already destroyed",
            )),
        }
    }
}

/// Keeps a context installed in a slot until dropped.
///
/// The guard is bound to the thread that created it and is neither `Send`
/// nor `Sync`. Dropping it clears the slot; a failed clear is logged at
/// `warn` and never replaces whatever result the guarded work produced.
#[must_use = "the context is removed as soon as the guard is dropped"]
pub struct SlotGuard<C, S: ContextSlot<C>> {
    slot: S,
    // Contexts live in thread-bound storage
    _not_send: PhantomData<*const C>,
}

impl<C, S: ContextSlot<C>> SlotGuard<C, S> {
    /// Installs `ctx` in `slot` and returns the guard that will remove it.
    ///
    /// # Errors
    ///
    /// Returns an `IllegalState` error if `slot` is already active. In that
    /// case the existing context is left installed and untouched.
    pub fn enter(slot: S, ctx: C) -> Result<Self, ScopeError> {
        slot.install(ctx)?;
        tracing::trace!(context = type_name::<C>(), "request context installed");
        Ok(Self {
            slot,
            _not_send: PhantomData,
        })
    }
}

impl<C, S: ContextSlot<C>> Drop for SlotGuard<C, S> {
    fn drop(&mut self) {
        match self.slot.remove() {
            Ok(_) => tracing::trace!(context = type_name::<C>(), "request context removed"),
            Err(err) => tracing::warn!(
                context = type_name::<C>(),
                error = %err,
                "failed to remove request context"
            ),
        }
    }
}

impl<C, S: ContextSlot<C>> fmt::Debug for SlotGuard<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotGuard")
            .field("context", &type_name::<C>())
            .finish_non_exhaustive()
    }
}
