use {
    http::{Method, StatusCode},
    std::process::ExitCode,
    std::sync::{Arc, OnceLock},
    svckit::cache::Cache,
    svckit::server::{BoxHandler, RequestContext, json_response},
    svckit::{Config, ServiceBuilder},
};

/// Builds the default service: operational routes over the subsystems the
/// configuration enables. Applications embedding svckit register their own
/// routes instead; this binary is the runnable baseline.
fn build_service(config: Config) -> svckit::Result<Arc<svckit::Service>> {
    let handle: Arc<OnceLock<Arc<svckit::Service>>> = Arc::new(OnceLock::new());

    let live: BoxHandler = Arc::new(|_ctx: RequestContext| async move {
        Ok(json_response(StatusCode::OK, &serde_json::json!({"status": "ok"})))
    });

    let health_handle = Arc::clone(&handle);
    let ready: BoxHandler = Arc::new(move |_ctx: RequestContext| {
        let handle = Arc::clone(&health_handle);
        async move {
            let Some(service) = handle.get() else {
                return Ok(json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &serde_json::json!({"status": "starting"}),
                ));
            };
            let results = service.health().check_all().await;
            let status = if service.health().is_healthy() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Ok(json_response(status, &results))
        }
    });

    let tls_handle = Arc::clone(&handle);
    let certificates: BoxHandler = Arc::new(move |_ctx: RequestContext| {
        let handle = Arc::clone(&tls_handle);
        async move {
            let statuses = handle
                .get()
                .and_then(|service| service.tls())
                .map(|tls| tls.status())
                .unwrap_or_default();
            Ok(json_response(StatusCode::OK, &statuses))
        }
    });

    let cache_handle = Arc::clone(&handle);
    let cache_stats: BoxHandler = Arc::new(move |_ctx: RequestContext| {
        let handle = Arc::clone(&cache_handle);
        async move {
            let stats = handle
                .get()
                .and_then(|service| service.cache())
                .map(|cache| cache.stats())
                .unwrap_or_default();
            Ok(json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "hits": stats.hits,
                    "misses": stats.misses,
                    "evictions": stats.evictions,
                    "invalidations": stats.invalidations,
                    "entries": stats.entries,
                }),
            ))
        }
    });

    let service = Arc::new(
        ServiceBuilder::new(config)?
            .route(Method::GET, "/live", live)
            .route(Method::GET, "/ready", ready)
            .route(Method::GET, "/status/certificates", certificates)
            .route(Method::GET, "/status/cache", cache_stats)
            .build()?,
    );

    let _ = handle.set(Arc::clone(&service));
    Ok(service)
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::default();
    config.setup_tracing();

    let service = match build_service(config) {
        Ok(service) => service,
        Err(err) => {
            eprintln!("startup failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    match svckit::cli::run(service).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
