//! # svckit
//!
//! A batteries-included microservice runtime: composable HTTP routing,
//! dependency-aware caching, ACME TLS, events, documents and metrics
//! driven by configuration.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use svckit::{Config, Result, ServiceBuilder};
//! use svckit::server::{json_response, RequestContext};
//! use http::{Method, StatusCode};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::default(); // Loads from config/{RUST_ENV}.toml
//!     config.setup_tracing();
//!
//!     let service = ServiceBuilder::new(config)?
//!         .route(Method::GET, "/hello/{name}", Arc::new(|ctx: RequestContext| async move {
//!             let name = ctx.param("name").unwrap_or("world").to_string();
//!             Ok(json_response(StatusCode::OK, &serde_json::json!({"hello": name})))
//!         }))
//!         .build()?;
//!
//!     service.run_until_signal().await
//! }
//! ```
//!
//! With `config/dev.toml`:
//! ```toml
//! [server.http]
//! bind_port = 3000
//!
//! [cache]
//! max_entries = 10000
//! default_ttl = "1h"
//! ```
//!
//! Run with `RUST_ENV=dev cargo run`.
//!
//! # What You Get
//!
//! | Subsystem | Description | Default |
//! |-----------|-------------|---------|
//! | Router | Two-phase matcher with `{param}` captures and per-route policy | Enabled |
//! | Middleware | Weight-ordered chain with per-route allow/deny lists | recovery + request-log |
//! | Cache | TTL + FIFO store with revision-keyed dependency invalidation | Enabled |
//! | TLS | Static key pairs or ACME auto-provisioning with renewal | Disabled |
//! | Events | In-process pub/sub with signed webhook fan-out | Enabled |
//! | Documents | Collections with Mongo-style filters and updates | Enabled |
//! | Metrics | Counter/Gauge/Histogram/Summary, memory or Prometheus | Enabled |
//! | Health | Probe registry with cached results | Enabled |
//! | Graceful shutdown | Reverse-order stop with a bounded parallel group | 10s timeout |
//!
//! # Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Configuration loading and validation ([`Config`]) |
//! | [`service`] | Subsystem wiring and lifecycle ([`Service`], [`ServiceBuilder`]) |
//! | [`router`] | Route registration and matching |
//! | [`middleware`] | The request-processing chain |
//! | [`server`] | The HTTP edge, request context and responses |
//! | [`cache`] | The cache engine and its contracts |
//! | [`events`] | The action bus and webhooks |
//! | [`store`] | The document store |
//! | [`metrics`] | The metrics facade and backends |
//! | [`tls`] | Certificate management |
//! | [`health`] | Health probes |
//! | [`cli`] | The `start`/dispatch command surface |
//!
//! # Error Handling
//!
//! The crate uses an opaque [`Error`] with an [`ErrorKind`] for matching.
//! On the wire, errors render as:
//!
//! ```json
//! {
//!   "error": "Not Found",
//!   "message": "no route for GET /missing"
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod server;
pub mod service;
pub mod store;
pub mod tls;

mod error;
mod utils;

pub use config::Config;
pub use error::{Error, ErrorKind};
pub use lifecycle::{Component, ComponentState, Lifecycle};
pub use router::{RoutePolicy, RouterBuilder};
pub use service::{Service, ServiceBuilder};
pub use utils::{Sensitive, replace_handlebars_with_env};

pub type Result<T> = std::result::Result<T, Error>;
