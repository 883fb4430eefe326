//! Background task demonstration.
//!
//! This example shows how a request handler hands its context to work that
//! runs off the request thread:
//! 1. Authenticate the caller and enter the request scope
//! 2. Wrap background work with a continuation of the context
//! 3. Run it on a worker thread, where the context is visible
//! 4. Observe that both threads end up with the right slot state
//!
//! Run with: `cargo run --example background_task`

use std::cell::RefCell;

use request_scope::{
    AuthUser, ContextSlot, RequestContext, ScopeError, ScopePropagator, ThreadLocalSlot,
};

thread_local! {
    static REQUEST: RefCell<Option<RequestContext>> = const { RefCell::new(None) };
}

fn slot() -> ThreadLocalSlot<RequestContext> {
    ThreadLocalSlot::new(&REQUEST)
}

/// Simulates an authentication backend resolving a bearer token
fn authenticate(auth_header: Option<&str>) -> Result<Option<AuthUser>, ScopeError> {
    match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => AuthUser::from_parts(&format!("token:{token}"), Some("alice")).map(Some),
        None => Ok(None),
    }
}

/// Simulates reindexing a change after the response has been sent
fn reindex_change(change: u32) -> Result<String, ScopeError> {
    let who = slot().with_active(|ctx| {
        ctx.and_then(RequestContext::user)
            .map(ToString::to_string)
            .unwrap_or_else(|| "anonymous".to_string())
    });
    tracing::info!(change, %who, "reindexing change");
    Ok(format!("change {change} reindexed for {who}"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .init();

    let propagator = ScopePropagator::builder(slot())
        .continuation(RequestContext::continuing as fn(&RequestContext) -> RequestContext)
        .thread_name("reindex")
        .build();

    let mut ctx = RequestContext::new("req-0001");
    if let Some(user) = authenticate(Some("Bearer abc123"))? {
        ctx = ctx.with_user(user);
    }
    ctx.set_scoped("visible_changes", "3");

    let _request = slot().enter(ctx)?;

    let handle = propagator.spawn(|| reindex_change(42))?;
    let outcome = handle.join().map_err(|_| "reindex worker panicked")??;
    tracing::info!(%outcome, "background work finished");

    // Running propagated work on a thread that is still serving a request fails
    let work = propagator.wrap(|| reindex_change(43))?;
    match work.call_once() {
        Ok(_) => tracing::warn!("unexpected success on a busy thread"),
        Err(err) => tracing::info!(%err, "refused to stack a second context"),
    }

    Ok(())
}
