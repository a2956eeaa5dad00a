//! The middleware pipeline: a weight-ordered chain with per-route control.
//!
//! A middleware exposes a stable [`name`](Middleware::name), a numeric
//! [`weight`](Middleware::weight) and a [`handle`](Middleware::handle)
//! method receiving the request context and the rest of the chain as
//! [`Next`]. The manager keeps middlewares sorted by ascending weight, ties
//! broken by insertion order, which defines one deterministic global order.
//!
//! Per-request assembly:
//!
//! 1. Start from the globally sorted list.
//! 2. Remove entries named in `policy.disabled_middlewares`.
//! 3. When `policy.middlewares` is non-empty, intersect with it, keeping
//!    global order among the survivors.
//! 4. Compose into `next` closures terminating at the route handler.
//!
//! A middleware that writes a response without calling `next` short-circuits
//! the chain. Panics anywhere in the chain are caught by the execution
//! wrapper and surface as a logged 500, never a process exit.

mod basic_auth;
mod logging;
mod recover;

pub use basic_auth::BasicAuthMiddleware;
pub use logging::RequestLogMiddleware;
pub use recover::RecoveryMiddleware;

use {
    crate::router::RoutePolicy,
    crate::server::{BoxHandler, RequestContext, Response},
    crate::{Error, Result},
    async_trait::async_trait,
    futures::FutureExt,
    parking_lot::RwLock,
    std::panic::AssertUnwindSafe,
    std::sync::Arc,
    std::sync::atomic::{AtomicBool, Ordering},
};

/// A single link in the request-processing chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable name used by per-route allow/deny lists.
    fn name(&self) -> &str;

    /// Position in the global order; lower weights run earlier (outermost).
    fn weight(&self) -> i32;

    /// Processes the request, optionally delegating to the rest of the
    /// chain via `next.run(ctx)`.
    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> Result<Response>;
}

/// The remainder of the chain, ending at the route handler.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    handler: &'a BoxHandler,
}

impl Next<'_> {
    /// Invokes the rest of the chain.
    pub async fn run(self, ctx: RequestContext) -> Result<Response> {
        match self.chain.split_first() {
            Some((first, rest)) => {
                first
                    .handle(
                        ctx,
                        Next {
                            chain: rest,
                            handler: self.handler,
                        },
                    )
                    .await
            }
            None => self.handler.call(ctx).await,
        }
    }
}

/// Owns the globally ordered middleware list and executes per-request chains.
///
/// Registration is only permitted before the service starts; the manager is
/// frozen by `Service::start()` and later mutation returns
/// [`crate::ErrorKind::AlreadyRunning`].
pub struct MiddlewareManager {
    entries: RwLock<Vec<Arc<dyn Middleware>>>,
    frozen: AtomicBool,
}

impl Default for MiddlewareManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MiddlewareManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// Creates a manager pre-populated with the standard entries:
    /// recovery, request logging.
    pub fn with_standard_entries() -> Self {
        let manager = Self::new();
        manager
            .register(Arc::new(RecoveryMiddleware::default()))
            .expect("fresh manager accepts registration");
        manager
            .register(Arc::new(RequestLogMiddleware::default()))
            .expect("fresh manager accepts registration");
        manager
    }

    /// Registers a middleware, keeping the list sorted by ascending weight
    /// with ties in insertion order.
    pub fn register(&self, middleware: Arc<dyn Middleware>) -> Result<()> {
        if self.frozen.load(Ordering::SeqCst) {
            return Err(Error::already_running("middleware manager"));
        }
        let mut entries = self.entries.write();
        entries.push(middleware);
        // Stable sort preserves insertion order among equal weights.
        entries.sort_by_key(|m| m.weight());
        Ok(())
    }

    /// Freezes the manager; called once from `Service::start()`.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    /// Returns the names of the registered middlewares in global order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Assembles the chain for one request according to the route policy.
    pub fn chain_for(&self, policy: &RoutePolicy) -> Vec<Arc<dyn Middleware>> {
        self.entries
            .read()
            .iter()
            .filter(|m| !policy.disabled_middlewares.iter().any(|d| d == m.name()))
            .filter(|m| {
                policy.middlewares.is_empty()
                    || policy.middlewares.iter().any(|a| a == m.name())
            })
            .cloned()
            .collect()
    }

    /// Runs the assembled chain for a request, terminating at `handler`.
    ///
    /// The whole chain future is wrapped so a panic in any middleware or
    /// handler becomes a logged internal error (the dispatch path turns it
    /// into a 500 response).
    pub async fn execute(&self, ctx: RequestContext, handler: &BoxHandler) -> Result<Response> {
        let chain = self.chain_for(&ctx.policy);
        let request_id = ctx.request_id.clone();
        let next = Next {
            chain: &chain,
            handler,
        };

        match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic_message(&panic);
                tracing::error!(request_id = %request_id, panic = %detail, "request chain panicked");
                Err(Error::internal(format!("panic in request chain: {detail}")))
            }
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
