//! End-to-end tests for handing request contexts to other threads.
//!
//! These tests exercise the public API the way a request layer would: enter
//! a request on one thread, wrap background work, run it elsewhere.

use std::cell::RefCell;
use std::thread;

use request_scope::{
    AuthUser, ContextSlot, RequestContext, ScopeError, ScopeErrorKind, ScopePropagator,
    ThreadLocalSlot,
};

thread_local! {
    static REQUEST: RefCell<Option<RequestContext>> = const { RefCell::new(None) };
}

fn slot() -> ThreadLocalSlot<RequestContext> {
    ThreadLocalSlot::new(&REQUEST)
}

fn propagator() -> ScopePropagator<
    RequestContext,
    ThreadLocalSlot<RequestContext>,
    fn(&RequestContext) -> RequestContext,
> {
    ScopePropagator::new(
        slot(),
        RequestContext::continuing as fn(&RequestContext) -> RequestContext,
    )
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

fn alice_request() -> RequestContext {
    let alice = AuthUser::from_parts("ldap:alice", Some("alice")).expect("valid uuid");
    let mut ctx = RequestContext::new("req-alice").with_user(alice);
    ctx.set_scoped("visible_changes", "17");
    ctx
}

fn current_username() -> Option<String> {
    slot().with_active(|ctx| {
        ctx.and_then(RequestContext::user)
            .and_then(AuthUser::username)
            .map(str::to_owned)
    })
}

/// Error type of a background task that opts into scope errors.
#[derive(Debug, PartialEq)]
enum TaskError {
    Scope(ScopeErrorKind),
    Failed(&'static str),
}

impl From<ScopeError> for TaskError {
    fn from(err: ScopeError) -> Self {
        TaskError::Scope(err.kind)
    }
}

#[test]
fn wrap_outside_request_is_out_of_scope() {
    init_tracing();
    let err = propagator()
        .wrap(|| Ok::<_, ScopeError>(()))
        .expect_err("no request is active");
    assert_eq!(err.kind, ScopeErrorKind::OutOfScope);
}

#[test]
fn work_returns_42_on_fresh_thread_and_is_reusable() {
    init_tracing();
    let _request = slot().enter(alice_request()).expect("empty slot");

    let work = propagator()
        .wrap(|| {
            let user = current_username();
            Ok::<_, ScopeError>((42, user))
        })
        .expect("request is active");

    let worker = thread::spawn(move || {
        let first = work.call();
        let after_first = slot().is_active();
        let second = work.call();
        let after_second = slot().is_active();
        (first, after_first, second, after_second)
    });

    let (first, after_first, second, after_second) = worker.join().expect("worker panicked");

    assert_eq!(first, Ok((42, Some("alice".to_string()))));
    assert!(!after_first);
    assert_eq!(second, Ok((42, Some("alice".to_string()))));
    assert!(!after_second);

    // The originating thread still has its own request
    assert_eq!(current_username().as_deref(), Some("alice"));
}

#[test]
fn continuation_drops_request_scoped_values() {
    init_tracing();
    let _request = slot().enter(alice_request()).expect("empty slot");

    let work = propagator()
        .wrap(|| {
            slot().with_active(|ctx| {
                ctx.map(|c| {
                    let cached = c.scoped("visible_changes").is_some();
                    (c.request_id().to_string(), cached)
                })
            })
        })
        .expect("request is active");

    let seen = thread::spawn(move || work.run())
        .join()
        .expect("worker panicked")
        .expect("fresh thread");

    assert_eq!(seen, Some(("req-alice".to_string(), false)));
}

#[test]
fn failing_work_keeps_its_error_and_clears_slot() {
    init_tracing();
    let _request = slot().enter(alice_request()).expect("empty slot");

    let work = propagator()
        .wrap(|| Err::<(), _>(TaskError::Failed("index unavailable")))
        .expect("request is active");

    let (result, active_after) = thread::spawn(move || {
        let result = work.call_once();
        (result, slot().is_active())
    })
    .join()
    .expect("worker panicked");

    assert_eq!(result, Err(TaskError::Failed("index unavailable")));
    assert!(!active_after);
}

#[test]
fn busy_thread_rejects_propagated_work() {
    init_tracing();
    let _request = slot().enter(alice_request()).expect("empty slot");
    let work = propagator()
        .wrap(|| Ok::<_, TaskError>("ran"))
        .expect("request is active");

    let outcome = thread::spawn(move || {
        let bob = AuthUser::from_parts("ldap:bob", Some("bob")).expect("valid uuid");
        let _other = slot()
            .enter(RequestContext::new("req-bob").with_user(bob))
            .expect("empty slot");

        let result = work.call();
        (result, current_username())
    })
    .join()
    .expect("worker panicked");

    assert_eq!(outcome.0, Err(TaskError::Scope(ScopeErrorKind::IllegalState)));
    // The thread's own request is untouched
    assert_eq!(outcome.1.as_deref(), Some("bob"));
}

#[test]
fn snapshot_is_not_a_live_view() {
    init_tracing();
    let _request = slot().enter(alice_request()).expect("empty slot");
    let work = propagator()
        .wrap(current_username)
        .expect("request is active");

    // Swap the principal on the originating thread after wrapping
    REQUEST.with(|cell| {
        let mut active = cell.borrow_mut();
        if let Some(ctx) = active.take() {
            let mallory =
                AuthUser::from_parts("ldap:mallory", Some("mallory")).expect("valid uuid");
            *active = Some(RequestContext::new(ctx.request_id()).with_user(mallory));
        }
    });

    let seen = thread::spawn(move || work.run())
        .join()
        .expect("worker panicked")
        .expect("fresh thread");
    assert_eq!(seen.as_deref(), Some("alice"));
}

#[test]
fn independent_wraps_from_one_thread() {
    init_tracing();
    let _request = slot().enter(alice_request()).expect("empty slot");
    let propagator = propagator();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            propagator
                .spawn(move || Ok::<_, ScopeError>((i, current_username())))
                .expect("request is active")
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let (n, user) = handle.join().expect("worker panicked").expect("fresh thread");
        assert_eq!(n, i);
        assert_eq!(user.as_deref(), Some("alice"));
    }
}

#[test]
fn panicking_work_clears_worker_slot() {
    init_tracing();
    let _request = slot().enter(alice_request()).expect("empty slot");
    let work = propagator()
        .wrap(|| -> Result<(), ScopeError> { panic!("background task exploded") })
        .expect("request is active");

    let active_after = thread::spawn(move || {
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| work.call()));
        assert!(caught.is_err());
        slot().is_active()
    })
    .join()
    .expect("worker panicked outside catch_unwind");

    assert!(!active_after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn future_carries_context_onto_runtime_workers() {
    init_tracing();
    let fut = {
        let _request = slot().enter(alice_request()).expect("empty slot");
        propagator()
            .wrap_future(async {
                tokio::task::yield_now().await;
                Ok::<_, ScopeError>(current_username())
            })
            .expect("request is active")
    };

    let user = tokio::spawn(fut)
        .await
        .expect("task panicked")
        .expect("worker slot empty");
    assert_eq!(user.as_deref(), Some("alice"));
}
