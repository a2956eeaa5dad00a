//! Panic recovery middleware.

use {
    super::{Middleware, Next, panic_message},
    crate::Result,
    crate::server::{RequestContext, Response, error_response},
    async_trait::async_trait,
    futures::FutureExt,
    std::panic::AssertUnwindSafe,
};

/// Catches panics from the inner chain and converts them into a 500
/// response. Registered with the lowest standard weight so it wraps every
/// other middleware; the manager's execution wrapper remains as a second
/// net for routes that disable this entry.
pub struct RecoveryMiddleware {
    weight: i32,
}

impl Default for RecoveryMiddleware {
    fn default() -> Self {
        Self { weight: -100 }
    }
}

impl RecoveryMiddleware {
    /// Creates a recovery middleware with an explicit weight.
    pub fn with_weight(weight: i32) -> Self {
        Self { weight }
    }
}

#[async_trait]
impl Middleware for RecoveryMiddleware {
    fn name(&self) -> &str {
        "recovery"
    }

    fn weight(&self) -> i32 {
        self.weight
    }

    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> Result<Response> {
        let request_id = ctx.request_id.clone();
        match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic_message(&panic);
                tracing::error!(request_id = %request_id, panic = %detail, "recovered from panic");
                Ok(error_response(
                    &crate::Error::internal(format!("panic: {detail}")),
                    Some(&request_id),
                ))
            }
        }
    }
}
