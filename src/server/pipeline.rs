//! Request dispatch: route match, cache consult, middleware chain,
//! timeouts and the error envelope.

use {
    super::{RequestContext, Response, empty_response, error_response, json_response},
    crate::cache::Cache,
    crate::metrics::{DEFAULT_BUCKETS, Labels, MetricsBackend},
    crate::middleware::MiddlewareManager,
    crate::router::{CachePolicy, RouteMatch, Router},
    crate::utils::{X_REQUEST_ID, request_id_for},
    crate::{Error, ErrorKind},
    bytes::Bytes,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    std::collections::BTreeMap,
    std::sync::Arc,
    std::time::{Duration, Instant},
    tokio_util::sync::CancellationToken,
};

const X_CACHE: &str = "x-cache";

/// Everything needed to turn a parsed request into a response.
///
/// Assembled once by `Service::start()` from the compiled router, the
/// frozen middleware chain and the cache engine, then shared by every
/// connection.
pub struct RequestPipeline {
    router: Arc<Router>,
    middleware: Arc<MiddlewareManager>,
    cache: Option<Arc<dyn Cache>>,
    metrics: Arc<dyn MetricsBackend>,
    default_timeout: Option<Duration>,
}

impl RequestPipeline {
    pub fn new(
        router: Arc<Router>,
        middleware: Arc<MiddlewareManager>,
        cache: Option<Arc<dyn Cache>>,
        metrics: Arc<dyn MetricsBackend>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            router,
            middleware,
            cache,
            metrics,
            default_timeout,
        }
    }

    /// Returns the compiled router backing this pipeline.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Dispatches one request through match → cache → chain → handler.
    ///
    /// Never returns an error: every failure is rendered into the wire
    /// envelope here so connection handling stays infallible.
    pub async fn dispatch(
        &self,
        method: Method,
        path: String,
        headers: HeaderMap,
        body: Bytes,
        server_scope: CancellationToken,
    ) -> Response {
        let started = Instant::now();
        let request_id = request_id_for(&headers);

        let (route, params) = match self.router.matches(&method, &path) {
            RouteMatch::Found { route, params } => (route, params),
            RouteMatch::PreflightOk => {
                return self.finish(
                    empty_response(StatusCode::OK),
                    &method,
                    &request_id,
                    started,
                );
            }
            RouteMatch::NotFound => {
                let err = Error::not_found(format!("no route for {method} {path}"));
                return self.finish(
                    error_response(&err, Some(&request_id)),
                    &method,
                    &request_id,
                    started,
                );
            }
        };

        let ctx = RequestContext::new(method.clone(), path.clone())
            .with_headers(headers)
            .with_body(body)
            .with_params(params)
            .with_policy(Arc::clone(&route.policy))
            .with_cancellation(server_scope.child_token());

        // Cache consult happens before the chain so hits skip middleware
        // cost entirely; only successful JSON responses are stored back.
        let cache_plan = self.cache_plan(&ctx, route.policy.cache.as_ref());
        if let Some(plan) = &cache_plan
            && let Some(hit) = plan.lookup().await
        {
            let mut response = json_response(StatusCode::OK, &hit);
            response
                .headers_mut()
                .insert(X_CACHE, HeaderValue::from_static("hit"));
            return self.finish(response, &method, &request_id, started);
        }

        let timeout = route.policy.timeout.or(self.default_timeout);
        let outcome = self.run_chain(ctx, &route.handler, timeout).await;

        let mut response = match outcome {
            Ok(response) => {
                if let Some(plan) = &cache_plan {
                    plan.store(&response).await;
                }
                if cache_plan.is_some() {
                    let mut response = response;
                    response
                        .headers_mut()
                        .insert(X_CACHE, HeaderValue::from_static("miss"));
                    response
                } else {
                    response
                }
            }
            Err(err) => {
                if err.status_code().is_server_error() {
                    tracing::error!(
                        method = %method,
                        path = %path,
                        request_id = %request_id,
                        error = %err,
                        "request failed"
                    );
                }
                error_response(&err, Some(&request_id))
            }
        };

        if !response.headers().contains_key(X_REQUEST_ID)
            && let Ok(value) = HeaderValue::from_str(&request_id)
        {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
        self.finish(response, &method, &request_id, started)
    }

    async fn run_chain(
        &self,
        ctx: RequestContext,
        handler: &super::BoxHandler,
        timeout: Option<Duration>,
    ) -> crate::Result<Response> {
        let cancel = ctx.cancellation_token();
        let chain = self.middleware.execute(ctx, handler);

        match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, chain).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    Err(Error::new(
                        ErrorKind::Timeout,
                        format!("request exceeded {}", humantime::format_duration(deadline)),
                    ))
                }
            },
            None => chain.await,
        }
    }

    fn cache_plan<'a>(
        &'a self,
        ctx: &RequestContext,
        policy: Option<&CachePolicy>,
    ) -> Option<CachePlan<'a>> {
        let cache = self.cache.as_deref()?;
        let policy = policy?;
        if !policy.enabled {
            return None;
        }

        let base = policy.key_template.as_deref().unwrap_or(&ctx.path);
        let dependencies: Vec<&str> = policy.dependencies.iter().map(String::as_str).collect();
        let metadata: BTreeMap<String, String> = ctx
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let key = cache.build_cache_key(base, &dependencies, &metadata);

        Some(CachePlan {
            cache,
            key,
            ttl: policy.ttl.unwrap_or(Duration::ZERO),
        })
    }

    fn finish(
        &self,
        response: Response,
        method: &Method,
        request_id: &str,
        started: Instant,
    ) -> Response {
        let mut response = response;
        if !response.headers().contains_key(X_REQUEST_ID)
            && let Ok(value) = HeaderValue::from_str(request_id)
        {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }

        let status = response.status();
        let labels = crate::metrics::labels([
            ("method", method.as_str()),
            ("status", status.as_str()),
        ]);
        self.metrics.counter("http_requests_total", &labels).inc();
        if status.is_server_error() {
            self.metrics
                .counter("http_request_errors_total", &labels)
                .inc();
        }
        self.metrics
            .histogram("http_request_duration_seconds", &Labels::new(), DEFAULT_BUCKETS)
            .observe(started.elapsed().as_secs_f64());

        response
    }
}

struct CachePlan<'a> {
    cache: &'a dyn Cache,
    key: String,
    ttl: Duration,
}

impl CachePlan<'_> {
    async fn lookup(&self) -> Option<serde_json::Value> {
        self.cache.get(&self.key).await
    }

    async fn store(&self, response: &Response) {
        if response.status() != StatusCode::OK {
            return;
        }
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(response.body()) else {
            // Non-JSON bodies are not cacheable through this pipeline.
            return;
        };
        if let Err(err) = self.cache.set(&self.key, value, self.ttl).await {
            tracing::warn!(key = %self.key, error = %err, "response caching failed");
        }
    }
}
