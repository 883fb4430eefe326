//! Propagation into async executors.
//!
//! A future migrates between worker threads and is interleaved with other
//! tasks on the same thread, so its context cannot simply stay installed.
//! [`PropagatedFuture`] installs the snapshot around each `poll` and removes
//! it before returning to the executor. A future dropped mid-flight (e.g. a
//! cancelled task) therefore never leaves a context behind.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::ScopeError;
use crate::slot::{ContextSlot, SlotGuard};

/// A future bound to a snapshot of the request context it was wrapped in.
///
/// Created by [`ScopePropagator::wrap_future`](crate::ScopePropagator::wrap_future).
/// If the polling thread already has an active context the inner future is
/// not polled. The future then resolves to `IllegalState` when this was its
/// first poll, and to `Interrupted` when earlier polls already ran part of
/// the inner future.
#[must_use = "futures do nothing unless polled"]
pub struct PropagatedFuture<C, S, Fut> {
    slot: S,
    context: C,
    inner: Pin<Box<Fut>>,
    started: bool,
}

impl<C, S, Fut> PropagatedFuture<C, S, Fut> {
    pub(crate) fn new(slot: S, context: C, inner: Fut) -> Self {
        Self {
            slot,
            context,
            inner: Box::pin(inner),
            started: false,
        }
    }

    /// Returns the context snapshot installed while polling.
    pub fn context(&self) -> &C {
        &self.context
    }
}

impl<C, S, Fut, T, E> Future for PropagatedFuture<C, S, Fut>
where
    C: Clone + Unpin,
    S: ContextSlot<C> + Clone + Unpin,
    Fut: Future<Output = Result<T, E>>,
    E: From<ScopeError>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _guard = match SlotGuard::enter(this.slot.clone(), this.context.clone()) {
            Ok(guard) => guard,
            Err(_) if this.started => return Poll::Ready(Err(ScopeError::interrupted().into())),
            Err(err) => return Poll::Ready(Err(err.into())),
        };
        this.started = true;
        this.inner.as_mut().poll(cx)
    }
}

impl<C: fmt::Debug, S, Fut> fmt::Debug for PropagatedFuture<C, S, Fut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagatedFuture")
            .field("context", &self.context)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScopeErrorKind;
    use crate::propagator::ScopePropagator;
    use crate::slot::ThreadLocalSlot;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Wake, Waker};

    thread_local! {
        static TENANT: RefCell<Option<String>> = const { RefCell::new(None) };
    }

    fn slot() -> ThreadLocalSlot<String> {
        ThreadLocalSlot::new(&TENANT)
    }

    fn propagator() -> ScopePropagator<String, ThreadLocalSlot<String>> {
        ScopePropagator::builder(slot()).build()
    }

    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    #[tokio::test]
    async fn context_visible_across_await_points() {
        let fut = {
            let _request = slot().enter("acme".to_string()).unwrap();
            propagator()
                .wrap_future(async {
                    let before = slot().current();
                    tokio::task::yield_now().await;
                    let after = slot().current();
                    Ok::<_, ScopeError>((before, after))
                })
                .unwrap()
        };

        let (before, after) = fut.await.unwrap();
        assert_eq!(before.as_deref(), Some("acme"));
        assert_eq!(after.as_deref(), Some("acme"));
        assert!(!slot().is_active());
    }

    #[tokio::test]
    async fn context_cleared_between_polls() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let fut = {
            let _request = slot().enter("acme".to_string()).unwrap();
            propagator()
                .wrap_future(async move {
                    rx.await.ok();
                    Ok::<_, ScopeError>(())
                })
                .unwrap()
        };

        let task = tokio::spawn(fut);
        tokio::task::yield_now().await;
        assert!(!slot().is_active());

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn polling_on_active_thread_is_illegal_state() {
        let _request = slot().enter("outer".to_string()).unwrap();
        let fut = propagator()
            .wrap_future(async { Ok::<_, ScopeError>(()) })
            .unwrap();

        let err = fut.await.unwrap_err();
        assert_eq!(err.kind, ScopeErrorKind::IllegalState);
        assert_eq!(slot().current().as_deref(), Some("outer"));
    }

    #[test]
    fn resuming_on_busy_thread_is_interrupted() {
        let progress = Arc::new(AtomicUsize::new(0));
        let mut fut = {
            let progress = Arc::clone(&progress);
            let _request = slot().enter("acme".to_string()).unwrap();
            propagator()
                .wrap_future(async move {
                    progress.fetch_add(1, Ordering::SeqCst);
                    std::future::pending::<()>().await;
                    progress.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ScopeError>(())
                })
                .unwrap()
        };

        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);

        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        assert_eq!(progress.load(Ordering::SeqCst), 1);
        assert!(!slot().is_active());

        let _other = slot().enter("other".to_string()).unwrap();
        match Pin::new(&mut fut).poll(&mut cx) {
            Poll::Ready(Err(err)) => assert_eq!(err.kind, ScopeErrorKind::Interrupted),
            other => panic!("expected an interrupted future, got {other:?}"),
        }

        // The inner future did not run again and the thread's own context stays
        assert_eq!(progress.load(Ordering::SeqCst), 1);
        assert_eq!(slot().current().as_deref(), Some("other"));
    }

    #[test]
    fn wrap_future_without_context_is_out_of_scope() {
        let err = propagator()
            .wrap_future(async { Ok::<_, ScopeError>(()) })
            .unwrap_err();
        assert_eq!(err.kind, ScopeErrorKind::OutOfScope);
    }
}
