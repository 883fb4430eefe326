/// Derives a continuation of a context for use on another thread.
///
/// A continuation is a snapshot: it keeps durable state such as the
/// authenticated user and drops request-scoped caches that must not be
/// shared across threads. It is derived on the originating thread when work
/// is wrapped, so later changes to the original context do not reach it.
///
/// Any `Fn(&C) -> C` closure or function is a strategy:
///
/// ```
/// use request_scope::Continuation;
///
/// let strip_cache = |ctx: &(String, Vec<u8>)| (ctx.0.clone(), Vec::new());
/// let continued = strip_cache.continuing(&("req-1".to_string(), vec![1, 2, 3]));
/// assert_eq!(continued, ("req-1".to_string(), vec![]));
/// ```
pub trait Continuation<C>: Send + Sync {
    /// Returns a new context based on `ctx` with no request-scoped objects
    /// initialized.
    fn continuing(&self, ctx: &C) -> C;
}

impl<C, F> Continuation<C> for F
where
    F: Fn(&C) -> C + Send + Sync,
{
    fn continuing(&self, ctx: &C) -> C {
        self(ctx)
    }
}

/// Continues a context by cloning it.
///
/// Suitable for contexts that carry no request-scoped caches, where a clone
/// is already safe to install on another thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneContinuation;

impl<C: Clone> Continuation<C> for CloneContinuation {
    fn continuing(&self, ctx: &C) -> C {
        ctx.clone()
    }
}
