use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crate::continuation::{CloneContinuation, Continuation};
use crate::error::{ScopeError, ScopeErrorKind};
use crate::future::PropagatedFuture;
use crate::slot::{ContextSlot, SlotGuard};

const DEFAULT_THREAD_NAME: &str = "request-scope";

/// Hands a snapshot of the active request context to work that runs on
/// another thread.
///
/// Wrapping reads the context active on the calling thread, derives a
/// continuation of it with the configured [`Continuation`] strategy and
/// returns a [`Propagated`] unit of work. Invoking that work on any thread
/// with an empty slot installs the continuation, runs the work and clears
/// the slot again on every exit path.
///
/// # Examples
///
/// ```
/// use std::cell::RefCell;
/// use request_scope::{ContextSlot, ScopePropagator, ScopeError, ThreadLocalSlot};
///
/// thread_local! {
///     static USER: RefCell<Option<String>> = const { RefCell::new(None) };
/// }
///
/// let slot = ThreadLocalSlot::new(&USER);
/// let propagator = ScopePropagator::new(slot, |user: &String| user.clone());
///
/// let _request = slot.enter("alice".to_string()).unwrap();
/// let work = propagator
///     .wrap(move || Ok::<_, ScopeError>(slot.current()))
///     .unwrap();
///
/// let seen = std::thread::spawn(move || work.call_once()).join().unwrap();
/// assert_eq!(seen.unwrap().as_deref(), Some("alice"));
/// ```
pub struct ScopePropagator<C, S, D = CloneContinuation> {
    slot: S,
    continuation: D,
    thread_name: String,
    stack_size: Option<usize>,
    spawned: AtomicUsize,
    _context: PhantomData<fn() -> C>,
}

impl<C, S, D> ScopePropagator<C, S, D>
where
    S: ContextSlot<C> + Clone,
    D: Continuation<C>,
{
    /// Creates a propagator with default spawn settings.
    pub fn new(slot: S, continuation: D) -> Self {
        PropagatorBuilder::new(slot).continuation(continuation).build()
    }

    /// Returns the slot this propagator reads from and installs into.
    pub fn slot(&self) -> &S {
        &self.slot
    }

    /// Derives a continuation of the context active on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an `OutOfScope` error if no context is active.
    pub fn capture(&self) -> Result<C, ScopeError> {
        let continued = self
            .slot
            .with_active(|active| active.map(|ctx| self.continuation.continuing(ctx)))
            .ok_or_else(ScopeError::out_of_scope)?;
        tracing::debug!(
            context = type_name::<C>(),
            "derived request context continuation"
        );
        Ok(continued)
    }

    /// Wraps `work` so it runs inside a continuation of the current context.
    ///
    /// The continuation is derived now, on the calling thread. Each call
    /// derives its own independent snapshot.
    ///
    /// # Errors
    ///
    /// Returns an `OutOfScope` error if no context is active on the calling
    /// thread.
    pub fn wrap<F>(&self, work: F) -> Result<Propagated<C, S, F>, ScopeError> {
        Ok(Propagated {
            slot: self.slot.clone(),
            context: self.capture()?,
            work,
        })
    }

    /// Wraps a future so each poll runs inside a continuation of the current
    /// context.
    ///
    /// The returned future resolves to `IllegalState` if its first poll
    /// happens on a thread that already has an active context; the inner
    /// future has not run at that point. If a later poll finds the thread
    /// busy, the inner future has already run part of its body and the
    /// result is `Interrupted` instead.
    ///
    /// # Errors
    ///
    /// Returns an `OutOfScope` error if no context is active on the calling
    /// thread.
    pub fn wrap_future<Fut>(
        &self,
        future: Fut,
    ) -> Result<PropagatedFuture<C, S, Fut>, ScopeError> {
        Ok(PropagatedFuture::new(self.slot.clone(), self.capture()?, future))
    }

    /// Wraps `work` and runs it on a freshly spawned thread.
    ///
    /// A new thread always starts with an empty slot, so the returned handle
    /// only yields `IllegalState` if `work` itself produces it.
    ///
    /// # Errors
    ///
    /// Returns an `OutOfScope` error if no context is active on the calling
    /// thread, or a `Spawn` error if the thread could not be started.
    pub fn spawn<F, T, E>(&self, work: F) -> Result<JoinHandle<Result<T, E>>, ScopeError>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<ScopeError> + Send + 'static,
        C: Send + 'static,
        S: Send + 'static,
    {
        let propagated = self.wrap(work)?;
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.thread_name, n));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder
            .spawn(move || propagated.call_once())
            .map_err(|err| {
                ScopeError::new(
                    ScopeErrorKind::Spawn,
                    format!("failed to spawn propagated worker: {err}"),
                )
            })
    }
}

impl<C, S> ScopePropagator<C, S, CloneContinuation>
where
    S: ContextSlot<C> + Clone,
{
    /// Starts configuring a propagator for `slot`.
    pub fn builder(slot: S) -> PropagatorBuilder<C, S, CloneContinuation> {
        PropagatorBuilder::new(slot)
    }
}

impl<C, S: fmt::Debug, D> fmt::Debug for ScopePropagator<C, S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopePropagator")
            .field("slot", &self.slot)
            .field("thread_name", &self.thread_name)
            .field("stack_size", &self.stack_size)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ScopePropagator`].
///
/// # Examples
///
/// ```
/// use std::cell::RefCell;
/// use request_scope::{ScopePropagator, ThreadLocalSlot};
///
/// thread_local! {
///     static REQUEST: RefCell<Option<u64>> = const { RefCell::new(None) };
/// }
///
/// let propagator = ScopePropagator::builder(ThreadLocalSlot::new(&REQUEST))
///     .continuation(|id: &u64| *id)
///     .thread_name("index-worker")
///     .stack_size(256 * 1024)
///     .build();
/// ```
#[derive(Debug)]
pub struct PropagatorBuilder<C, S, D> {
    slot: S,
    continuation: D,
    thread_name: String,
    stack_size: Option<usize>,
    _context: PhantomData<fn() -> C>,
}

impl<C, S> PropagatorBuilder<C, S, CloneContinuation> {
    /// Creates a builder that continues contexts by cloning them.
    pub fn new(slot: S) -> Self {
        Self {
            slot,
            continuation: CloneContinuation,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            stack_size: None,
            _context: PhantomData,
        }
    }
}

impl<C, S, D> PropagatorBuilder<C, S, D> {
    /// Sets the strategy that derives continuations.
    pub fn continuation<D2: Continuation<C>>(
        self,
        continuation: D2,
    ) -> PropagatorBuilder<C, S, D2> {
        PropagatorBuilder {
            slot: self.slot,
            continuation,
            thread_name: self.thread_name,
            stack_size: self.stack_size,
            _context: PhantomData,
        }
    }

    /// Sets the name prefix of threads started by [`ScopePropagator::spawn`].
    ///
    /// Threads are named `<prefix>-<n>`.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Sets the stack size of threads started by [`ScopePropagator::spawn`].
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Builds the propagator.
    pub fn build(self) -> ScopePropagator<C, S, D> {
        ScopePropagator {
            slot: self.slot,
            continuation: self.continuation,
            thread_name: self.thread_name,
            stack_size: self.stack_size,
            spawned: AtomicUsize::new(0),
            _context: PhantomData,
        }
    }
}

/// Work bound to a snapshot of the request context it was wrapped in.
///
/// Created by [`ScopePropagator::wrap`]. Every invocation:
///
/// 1. fails with `IllegalState` if the executing thread already has an
///    active context, leaving that context untouched;
/// 2. installs the snapshot;
/// 3. runs the work;
/// 4. removes the snapshot, even if the work failed or panicked;
/// 5. returns the work's result unchanged.
pub struct Propagated<C, S, F> {
    slot: S,
    context: C,
    work: F,
}

impl<C, S, F> Propagated<C, S, F>
where
    S: ContextSlot<C>,
{
    /// Returns the context snapshot that will be installed.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Runs reusable work, installing a fresh copy of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` (converted into `E`) if a context is already
    /// active on this thread, otherwise whatever the work returns.
    pub fn call<T, E>(&self) -> Result<T, E>
    where
        F: Fn() -> Result<T, E>,
        E: From<ScopeError>,
        C: Clone,
        S: Clone,
    {
        let _guard = SlotGuard::enter(self.slot.clone(), self.context.clone())?;
        (self.work)()
    }

    /// Runs the work once, consuming it.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` (converted into `E`) if a context is already
    /// active on this thread, otherwise whatever the work returns.
    pub fn call_once<T, E>(self) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<ScopeError>,
    {
        let Self {
            slot,
            context,
            work,
        } = self;
        let _guard = SlotGuard::enter(slot, context)?;
        work()
    }

    /// Runs infallible work once, consuming it.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if a context is already active on this thread.
    pub fn run<T>(self) -> Result<T, ScopeError>
    where
        F: FnOnce() -> T,
    {
        let Self {
            slot,
            context,
            work,
        } = self;
        let _guard = SlotGuard::enter(slot, context)?;
        Ok(work())
    }
}

impl<C: fmt::Debug, S, F> fmt::Debug for Propagated<C, S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Propagated")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
