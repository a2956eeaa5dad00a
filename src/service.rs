//! The service: an explicit struct of subsystem handles with ordered
//! startup and reverse-order shutdown.
//!
//! Subsystems are wired once by [`ServiceBuilder::build`] from the
//! configuration and the typed backend registries; there is no ambient
//! global container. Mutating surfaces (routes, middlewares, backend
//! factories) freeze at `start()`; later mutation returns
//! [`crate::ErrorKind::AlreadyRunning`].
//!
//! Startup order: metrics → cache → store → events → health → TLS →
//! router compilation → HTTP server. Shutdown walks the same list in
//! reverse through a bounded parallel group.

use {
    crate::cache::{Cache, MemoryCache},
    crate::config::Config,
    crate::events::ActionBus,
    crate::health::HealthManager,
    crate::lifecycle::{Component, Lifecycle, stop_all},
    crate::metrics::{MemoryMetrics, MetricsBackend, PrometheusMetrics, SystemCollector},
    crate::middleware::{Middleware, MiddlewareManager},
    crate::registry::Registry,
    crate::router::{RouterBuilder, RoutePolicy, Router},
    crate::server::{BoxHandler, HttpServer, RequestPipeline},
    crate::store::{DocumentStore, MemoryStore},
    crate::tls::TlsManager,
    crate::{Error, Result},
    http::Method,
    parking_lot::{Mutex, RwLock},
    std::sync::Arc,
};

/// A cache backend that also participates in the component lifecycle.
pub trait CacheBackend: Cache + Component {}
impl<T: Cache + Component> CacheBackend for T {}

/// A store backend that also participates in the component lifecycle.
pub trait StoreBackend: DocumentStore + Component {}
impl<T: DocumentStore + Component> StoreBackend for T {}

/// Assembles a [`Service`] from configuration, routes and backends.
pub struct ServiceBuilder {
    config: Config,
    router: RouterBuilder,
    middleware: Arc<MiddlewareManager>,
    cache_backends: Registry<dyn CacheBackend>,
    store_backends: Registry<dyn StoreBackend>,
    metrics_backends: Registry<dyn MetricsBackend>,
}

impl ServiceBuilder {
    /// Creates a builder with the built-in backends registered:
    /// cache `memory`, store `memory`, metrics `memory` and `prometheus`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let cache_backends: Registry<dyn CacheBackend> = Registry::new();
        cache_backends.register("memory", |config: &Config| {
            Ok(Arc::new(MemoryCache::new(config.cache.clone())) as Arc<dyn CacheBackend>)
        })?;

        let store_backends: Registry<dyn StoreBackend> = Registry::new();
        store_backends.register("memory", |_config: &Config| {
            Ok(Arc::new(MemoryStore::new()) as Arc<dyn StoreBackend>)
        })?;

        let metrics_backends: Registry<dyn MetricsBackend> = Registry::new();
        metrics_backends.register("memory", |_config: &Config| {
            Ok(Arc::new(MemoryMetrics::new()) as Arc<dyn MetricsBackend>)
        })?;
        metrics_backends.register("prometheus", |_config: &Config| {
            Ok(Arc::new(PrometheusMetrics::new()) as Arc<dyn MetricsBackend>)
        })?;

        Ok(Self {
            config,
            router: RouterBuilder::new(),
            middleware: Arc::new(MiddlewareManager::with_standard_entries()),
            cache_backends,
            store_backends,
            metrics_backends,
        })
    }

    /// Registers a route with the default policy.
    #[must_use]
    pub fn route(mut self, method: Method, pattern: &str, handler: BoxHandler) -> Self {
        self.router = self.router.route(method, pattern, handler);
        self
    }

    /// Registers a route with an explicit policy.
    #[must_use]
    pub fn route_with_policy(
        mut self,
        method: Method,
        pattern: &str,
        handler: BoxHandler,
        policy: RoutePolicy,
    ) -> Self {
        self.router = self.router.route_with_policy(method, pattern, handler, policy);
        self
    }

    /// Applies a closure to the route builder, for grouped registration.
    #[must_use]
    pub fn routes(mut self, f: impl FnOnce(RouterBuilder) -> RouterBuilder) -> Self {
        self.router = f(self.router);
        self
    }

    /// Adds a middleware to the global chain.
    pub fn middleware(self, middleware: Arc<dyn Middleware>) -> Result<Self> {
        self.middleware.register(middleware)?;
        Ok(self)
    }

    /// Registers an alternate cache backend factory.
    pub fn register_cache_backend<F>(self, name: &str, factory: F) -> Result<Self>
    where
        F: Fn(&Config) -> Result<Arc<dyn CacheBackend>> + Send + Sync + 'static,
    {
        self.cache_backends.register(name, factory)?;
        Ok(self)
    }

    /// Registers an alternate store backend factory.
    pub fn register_store_backend<F>(self, name: &str, factory: F) -> Result<Self>
    where
        F: Fn(&Config) -> Result<Arc<dyn StoreBackend>> + Send + Sync + 'static,
    {
        self.store_backends.register(name, factory)?;
        Ok(self)
    }

    /// Registers an alternate metrics backend factory.
    pub fn register_metrics_backend<F>(self, name: &str, factory: F) -> Result<Self>
    where
        F: Fn(&Config) -> Result<Arc<dyn MetricsBackend>> + Send + Sync + 'static,
    {
        self.metrics_backends.register(name, factory)?;
        Ok(self)
    }

    /// Resolves backends and wires the subsystem graph.
    ///
    /// Unknown backend names fail here, before anything starts.
    pub fn build(self) -> Result<Service> {
        let config = self.config;

        let metrics: Arc<dyn MetricsBackend> = if config.metrics.enabled {
            self.metrics_backends
                .resolve(&config.metrics.backend, &config)?
        } else {
            Arc::new(MemoryMetrics::new())
        };

        let system_collector = (config.metrics.enabled && config.metrics.system_collector)
            .then(|| Arc::new(SystemCollector::new(Arc::clone(&metrics), config.metrics.clone())));

        let cache = config
            .cache
            .enabled
            .then(|| self.cache_backends.resolve(&config.cache.backend, &config))
            .transpose()?;

        let store = config
            .database
            .enabled
            .then(|| self.store_backends.resolve(&config.database.backend, &config))
            .transpose()?;

        let actions = config
            .actions
            .enabled
            .then(|| Arc::new(ActionBus::new(config.name.clone(), &config.actions)));

        let health = Arc::new(HealthManager::new(config.health.clone()));

        let tls = config
            .server
            .tls
            .enabled
            .then(|| Arc::new(TlsManager::new(config.server.tls.clone())));

        let server = Arc::new(HttpServer::new(config.server.http.clone(), tls.clone()));

        self.cache_backends.freeze();
        self.store_backends.freeze();
        self.metrics_backends.freeze();

        Ok(Service {
            lifecycle: Lifecycle::new("service"),
            config,
            router_builder: Mutex::new(Some(self.router)),
            router: RwLock::new(None),
            pipeline: RwLock::new(None),
            middleware: self.middleware,
            metrics,
            system_collector,
            cache,
            store,
            actions,
            health,
            tls,
            server,
        })
    }
}

/// The assembled service.
pub struct Service {
    lifecycle: Lifecycle,
    config: Config,
    router_builder: Mutex<Option<RouterBuilder>>,
    router: RwLock<Option<Arc<Router>>>,
    pipeline: RwLock<Option<Arc<RequestPipeline>>>,
    middleware: Arc<MiddlewareManager>,
    metrics: Arc<dyn MetricsBackend>,
    system_collector: Option<Arc<SystemCollector>>,
    cache: Option<Arc<dyn CacheBackend>>,
    store: Option<Arc<dyn StoreBackend>>,
    actions: Option<Arc<ActionBus>>,
    health: Arc<HealthManager>,
    tls: Option<Arc<TlsManager>>,
    server: Arc<HttpServer>,
}

impl Service {
    /// The service configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The cache engine, when enabled.
    pub fn cache(&self) -> Option<Arc<dyn Cache>> {
        self.cache
            .as_ref()
            .map(|cache| Arc::clone(cache) as Arc<dyn Cache>)
    }

    /// The document store, when enabled.
    pub fn store(&self) -> Option<Arc<dyn DocumentStore>> {
        self.store
            .as_ref()
            .map(|store| Arc::clone(store) as Arc<dyn DocumentStore>)
    }

    /// The action bus, when enabled.
    pub fn actions(&self) -> Option<Arc<ActionBus>> {
        self.actions.clone()
    }

    /// The metrics backend.
    pub fn metrics(&self) -> Arc<dyn MetricsBackend> {
        Arc::clone(&self.metrics)
    }

    /// The health probe registry.
    pub fn health(&self) -> Arc<HealthManager> {
        Arc::clone(&self.health)
    }

    /// The TLS manager, when TLS is enabled.
    pub fn tls(&self) -> Option<Arc<TlsManager>> {
        self.tls.clone()
    }

    /// The compiled router; None before `start()`.
    pub fn router(&self) -> Option<Arc<Router>> {
        self.router.read().clone()
    }

    /// The bound server address once running.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.local_addr()
    }

    /// Dispatches one request through the pipeline without a socket, used
    /// by the CLI surface. Requires Running.
    pub async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: bytes::Bytes,
    ) -> Result<crate::server::Response> {
        self.lifecycle.ensure_running()?;
        let pipeline = self
            .pipeline
            .read()
            .clone()
            .ok_or_else(|| Error::internal("pipeline missing while running"))?;
        Ok(pipeline
            .dispatch(
                method,
                path.to_string(),
                http::HeaderMap::new(),
                body,
                self.lifecycle.cancellation_token(),
            )
            .await)
    }

    /// The components in startup order. Shutdown reverses this list.
    fn components_in_start_order(&self) -> Vec<Arc<dyn Component>> {
        let mut components: Vec<Arc<dyn Component>> = Vec::new();
        if let Some(collector) = &self.system_collector {
            components.push(Arc::clone(collector) as Arc<dyn Component>);
        }
        if let Some(cache) = &self.cache {
            components.push(Arc::clone(cache) as Arc<dyn Component>);
        }
        if let Some(store) = &self.store {
            components.push(Arc::clone(store) as Arc<dyn Component>);
        }
        if let Some(actions) = &self.actions {
            components.push(Arc::clone(actions) as Arc<dyn Component>);
        }
        components.push(Arc::clone(&self.health) as Arc<dyn Component>);
        if let Some(tls) = &self.tls {
            components.push(Arc::clone(tls) as Arc<dyn Component>);
        }
        components.push(Arc::clone(&self.server) as Arc<dyn Component>);
        components
    }

    /// Starts every subsystem in order, compiling the router and freezing
    /// the mutable surfaces.
    ///
    /// A failure part-way rolls back by stopping whatever already started,
    /// in reverse order.
    pub async fn start(&self) -> Result<()> {
        let guard = self.lifecycle.begin_start()?;

        // The router compiles exactly once; a restarted service reuses the
        // compiled form since registration is sealed at the first start.
        let taken = self.router_builder.lock().take();
        let router = match taken {
            Some(builder) => {
                let router = Arc::new(builder.compile());
                *self.router.write() = Some(Arc::clone(&router));
                router
            }
            None => self
                .router
                .read()
                .clone()
                .ok_or_else(|| Error::internal("router unavailable"))?,
        };

        self.middleware.freeze();

        let pipeline = Arc::new(RequestPipeline::new(
            router,
            Arc::clone(&self.middleware),
            self.cache(),
            Arc::clone(&self.metrics),
            self.config.server.http.request_timeout,
        ));
        *self.pipeline.write() = Some(Arc::clone(&pipeline));
        self.server.set_pipeline(pipeline)?;

        let components = self.components_in_start_order();
        let mut started: Vec<Arc<dyn Component>> = Vec::with_capacity(components.len());
        for component in components {
            if let Err(err) = component.start().await {
                tracing::error!(
                    component = component.name(),
                    error = %err,
                    "startup failed, rolling back"
                );
                started.reverse();
                stop_all(started, self.config.server.http.shutdown_timeout).await;
                return Err(err);
            }
            started.push(component);
        }

        guard.complete();
        tracing::info!(
            name = %self.config.name,
            version = %self.config.version,
            "service started"
        );
        Ok(())
    }

    /// Stops every subsystem in reverse startup order within the shutdown
    /// timeout.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.begin_stop()?;

        let mut components = self.components_in_start_order();
        components.reverse();
        stop_all(components, self.config.server.http.shutdown_timeout).await;

        tracing::info!(name = %self.config.name, "service stopped");
        Ok(())
    }

    /// Returns `true` while the service is running.
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Runs the service until the process receives SIGTERM or Ctrl-C,
    /// then stops it gracefully.
    pub async fn run_until_signal(&self) -> Result<()> {
        self.start().await?;
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        self.stop().await
    }
}

/// Waits for SIGTERM or Ctrl+C.
///
/// If signal registration fails, the function logs a warning and falls
/// back to waiting indefinitely so the service keeps running in
/// environments where handlers cannot be installed.
async fn wait_for_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::debug!("Ctrl+C signal received"),
            Err(err) => {
                tracing::warn!("Failed to install Ctrl+C handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut handler) => {
                handler.recv().await;
                tracing::debug!("SIGTERM signal received");
            }
            Err(err) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
