//! Per-request context and the terminal handler abstraction.

use {
    crate::router::RoutePolicy,
    crate::{Error, Result},
    bytes::Bytes,
    http::{HeaderMap, Method},
    serde::de::DeserializeOwned,
    std::collections::HashMap,
    std::future::Future,
    std::pin::Pin,
    std::sync::Arc,
    tokio_util::sync::CancellationToken,
};

/// The response type produced by handlers and middlewares.
pub type Response = http::Response<Bytes>;

/// The boxed future returned by a handler invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send + 'static>>;

/// A terminal request handler.
///
/// Implemented for every `Fn(RequestContext) -> impl Future<Output =
/// Result<Response>>`, so plain async closures register directly:
///
/// ```rust
/// use svckit::server::{BoxHandler, RequestContext, text_response};
/// use http::StatusCode;
/// use std::sync::Arc;
///
/// let handler: BoxHandler = Arc::new(|_ctx: RequestContext| async move {
///     Ok(text_response(StatusCode::OK, "hello"))
/// });
/// ```
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: RequestContext) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    fn call(&self, ctx: RequestContext) -> HandlerFuture {
        Box::pin((self)(ctx))
    }
}

/// A shared, type-erased handler.
pub type BoxHandler = Arc<dyn Handler>;

/// Everything a handler or middleware can observe about one request.
///
/// The context is owned and moves down the chain; middlewares may mutate it
/// before passing it on. Cancellation is propagated through the embedded
/// token, which is derived from the server scope and, when the route policy
/// carries a timeout, cancelled at the deadline.
#[derive(Clone)]
pub struct RequestContext {
    /// The request method.
    pub method: Method,
    /// The normalized request path.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// The fully-read request body.
    pub body: Bytes,
    /// Parameters captured by the route pattern.
    pub params: HashMap<String, String>,
    /// The matched route policy.
    pub policy: Arc<RoutePolicy>,
    /// Correlation ID, preserved from `x-request-id` or generated.
    pub request_id: String,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Creates a context with empty params and a default policy.
    ///
    /// Primarily used by the server dispatch path and by tests.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            params: HashMap::new(),
            policy: Arc::new(RoutePolicy::default()),
            request_id: crate::utils::new_request_id(),
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the captured path parameters.
    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Sets the matched route policy.
    pub fn with_policy(mut self, policy: Arc<RoutePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the request headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the cancellation scope for this request.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a captured path parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Deserializes the request body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|err| Error::invalid_input(format!("invalid JSON body: {err}")))
    }

    /// Returns the cancellation token derived from the server scope.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns `true` once the request scope has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("request_id", &self.request_id)
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_context_builders() {
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());

        let ctx = RequestContext::new(Method::GET, "/users/42")
            .with_body(r#"{"n": 1}"#)
            .with_params(params);

        assert_eq!(ctx.method, Method::GET);
        assert_eq!(ctx.path, "/users/42");
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.param("missing"), None);
    }

    #[test]
    fn test_json_body_deserializes() {
        #[derive(Deserialize)]
        struct Payload {
            n: i64,
        }

        let ctx = RequestContext::new(Method::POST, "/x").with_body(r#"{"n": 7}"#);
        let payload: Payload = ctx.json().unwrap();
        assert_eq!(payload.n, 7);
    }

    #[test]
    fn test_json_body_rejects_garbage() {
        let ctx = RequestContext::new(Method::POST, "/x").with_body("not json");
        let result: Result<serde_json::Value> = ctx.json();
        assert!(result.is_err());
    }

    #[test]
    fn test_cancellation_propagates() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new(Method::GET, "/x").with_cancellation(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_request_id_is_generated() {
        let ctx = RequestContext::new(Method::GET, "/x");
        assert!(!ctx.request_id.is_empty());
    }
}
