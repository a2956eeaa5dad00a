//! Request logging middleware.

use {
    super::{Middleware, Next},
    crate::Result,
    crate::server::{RequestContext, Response},
    async_trait::async_trait,
    std::time::Instant,
};

/// Logs one structured line per request with method, path, status, latency
/// and the correlation ID. Failures log at WARN so error spikes stand out
/// in aggregated views.
pub struct RequestLogMiddleware {
    weight: i32,
}

impl Default for RequestLogMiddleware {
    fn default() -> Self {
        Self { weight: -50 }
    }
}

impl RequestLogMiddleware {
    /// Creates a request log middleware with an explicit weight.
    pub fn with_weight(weight: i32) -> Self {
        Self { weight }
    }
}

#[async_trait]
impl Middleware for RequestLogMiddleware {
    fn name(&self) -> &str {
        "request-log"
    }

    fn weight(&self) -> i32 {
        self.weight
    }

    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> Result<Response> {
        let method = ctx.method.clone();
        let path = ctx.path.clone();
        let request_id = ctx.request_id.clone();
        let started = Instant::now();

        let result = next.run(ctx).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    method = %method,
                    path = %path,
                    status = response.status().as_u16(),
                    latency_ms = elapsed.as_millis() as u64,
                    request_id = %request_id,
                    "request"
                );
            }
            Err(err) => {
                tracing::warn!(
                    method = %method,
                    path = %path,
                    error = %err,
                    latency_ms = elapsed.as_millis() as u64,
                    request_id = %request_id,
                    "request failed"
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareManager;
    use crate::server::{BoxHandler, text_response};
    use http::{Method, StatusCode};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_logging_is_transparent() {
        let manager = MiddlewareManager::new();
        manager
            .register(Arc::new(RequestLogMiddleware::default()))
            .unwrap();

        let handler: BoxHandler = Arc::new(|_ctx: RequestContext| async move {
            Ok(text_response(StatusCode::ACCEPTED, "queued"))
        });

        let ctx = RequestContext::new(Method::POST, "/jobs");
        let response = manager.execute(ctx, &handler).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(&response.body()[..], b"queued");
    }

    #[tokio::test]
    async fn test_logging_propagates_errors() {
        let manager = MiddlewareManager::new();
        manager
            .register(Arc::new(RequestLogMiddleware::default()))
            .unwrap();

        let handler: BoxHandler = Arc::new(|_ctx: RequestContext| async move {
            Err(crate::Error::not_found("nothing here"))
        });

        let ctx = RequestContext::new(Method::GET, "/missing");
        let err = manager.execute(ctx, &handler).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }
}
