//!
//! Configuration structures and utilities for wiring up the service runtime.
//!
//! A configuration can be created in many ways:
//! - From an environment-specific TOML file via `Config::from_rust_env` or `Config::from_toml_file`
//! - From a TOML string via `Config::from_toml`
//! - Constructed programmatically via the builder methods on `Config`
//!
//! In both TOML-based methods, environment variables can be referenced in the TOML
//! using the {{ VAR_NAME }} syntax, and they will be substituted with the corresponding
//! environment variable value. This is done via the `replace_handlebars_with_env`
//! function and prevents sensitive information from being stored directly in the
//! TOML files.
//!
//! Configuration is split into logical sections, each represented by their own struct:
//!
//! - `ServerConfig` wrapping `HttpConfig` and `TlsConfig`
//! - `LoggingConfig` for logging and tracing settings
//! - `CacheConfig` for the cache engine
//! - `DatabaseConfig` for the document store
//! - `ActionsConfig` for the event dispatcher and webhook fan-out
//! - `MetricsConfig` for the metrics facade and system collector
//! - `HealthConfig` for the probe registry
//!
//! Unknown keys anywhere in the document are ignored, so configs may carry
//! sections for sidecar tooling without breaking startup.
//!

mod actions;
mod cache;
mod database;
mod http;
mod logging;
mod metrics;
mod tls;

pub use actions::*;
pub use cache::*;
pub use database::*;
pub use http::*;
pub use logging::*;
pub use metrics::*;
pub use tls::*;

pub use byte_unit::Byte;

use {
    crate::{Error, Result, utils::replace_handlebars_with_env},
    serde::Deserialize,
    std::{env, fs, str::FromStr, time::Duration},
};

/// HTTP and TLS settings grouped under the `[server]` table.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

/// Settings for the health probe registry.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Whether health probes run. Defaults to true.
    #[serde(default = "HealthConfig::default_enabled")]
    pub enabled: bool,

    /// How often registered probes are re-evaluated in the background.
    /// The default `interval` is 30 seconds.
    #[serde(default = "HealthConfig::default_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            interval: Self::default_interval(),
        }
    }
}

impl HealthConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_interval() -> Duration {
        Duration::from_secs(30)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service name, used in logs and as the default action source.
    #[serde(default = "Config::default_name")]
    pub name: String,

    /// Service version string. Defaults to the crate version.
    #[serde(default = "Config::default_version")]
    pub version: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub actions: ActionsConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub health: HealthConfig,

    /// The raw parsed document, kept for dotted-path lookups of sections the
    /// typed structs do not model.
    #[serde(skip)]
    raw: Option<toml::Value>,
}

impl Default for Config {
    ///
    /// Creates a default configuration.
    /// This will attempt to load configuration from the file based on the RUST_ENV
    /// environment variable falling back to a default configuration if the environment
    /// variable is not set. Configuration files should be located in the "config/"
    /// directory of your project.
    ///
    fn default() -> Self {
        match Self::from_rust_env() {
            Ok(config) => config,
            Err(_) => Config {
                name: Self::default_name(),
                version: Self::default_version(),
                server: ServerConfig::default(),
                logging: LoggingConfig::default(),
                cache: CacheConfig::default(),
                database: DatabaseConfig::default(),
                actions: ActionsConfig::default(),
                metrics: MetricsConfig::default(),
                health: HealthConfig::default(),
                raw: None,
            },
        }
    }
}

impl Config {
    fn default_name() -> String {
        env!("CARGO_PKG_NAME").into()
    }

    fn default_version() -> String {
        env!("CARGO_PKG_VERSION").into()
    }

    ///
    /// Loads the configuration from a file based on the RUST_ENV environment variable.
    /// If RUST_ENV is not set, loading fails and callers fall back to defaults.
    ///
    pub fn from_rust_env() -> Result<Config> {
        Self::from_toml_file(env::var("RUST_ENV")?)
    }

    ///
    /// Given an environment name, loads the corresponding configuration file,
    /// substitutes any environment variables, and returns a Config struct.
    /// The configuration file is expected to be located at "config/{env}.toml"
    /// where {env} is the provided environment name (e.g., "dev", "prod").
    ///
    pub fn from_toml_file(env: impl AsRef<str>) -> Result<Config> {
        let path = format!("config/{}.toml", env.as_ref());
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    ///
    /// Parses a configuration string in TOML format into a Config struct.
    ///
    pub fn from_toml(toml_str: &str) -> Result<Config> {
        toml_str.parse()
    }

    ///
    /// Looks up a raw value by dotted path, e.g. `"server.http.bind_port"`.
    /// Returns None for configs built programmatically or missing keys.
    ///
    pub fn lookup(&self, dotted_path: &str) -> Option<&toml::Value> {
        let mut current = self.raw.as_ref()?;
        for segment in dotted_path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Sets the HTTP server bind address.
    pub fn with_bind_addr<S: AsRef<str>>(mut self, addr: S) -> Self {
        self.server.http.bind_addr = addr.as_ref().into();
        self
    }

    /// Sets the HTTP server bind port.
    pub fn with_bind_port(mut self, port: u16) -> Self {
        self.server.http.bind_port = port;
        self
    }

    /// Sets the maximum number of concurrent requests.
    pub fn with_max_concurrent_requests(mut self, max: u32) -> Self {
        self.server.http.max_concurrent_requests = max;
        self
    }

    /// Sets the default per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.server.http.request_timeout = Some(timeout);
        self
    }

    /// Sets the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.server.http.shutdown_timeout = timeout;
        self
    }

    /// Sets the maximum payload size in bytes.
    pub fn with_max_payload_size_bytes(mut self, size: u64) -> Self {
        self.server.http.max_payload_size_bytes = Byte::from_u64(size);
        self
    }

    /// Sets the TLS configuration.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.server.tls = tls;
        self
    }

    /// Sets the cache capacity.
    pub fn with_cache_max_entries(mut self, max_entries: usize) -> Self {
        self.cache.max_entries = max_entries;
        self
    }

    /// Sets the cache default TTL.
    pub fn with_cache_default_ttl(mut self, ttl: Duration) -> Self {
        self.cache.default_ttl = ttl;
        self
    }

    /// Sets the log format.
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.logging.format = format;
        self
    }

    /// Sets the metrics backend name.
    pub fn with_metrics_backend<S: AsRef<str>>(mut self, backend: S) -> Self {
        self.metrics.backend = backend.as_ref().into();
        self
    }

    /// Sets the webhook registration file path.
    pub fn with_webhook_store_path<S: AsRef<str>>(mut self, path: S) -> Self {
        self.actions.webhook_store_path = Some(path.as_ref().into());
        self
    }

    /// Ensures that the configuration is valid.
    /// Most configuration values are either optional or have sensible defaults.
    /// Some are required and here we ensure that those required values are set.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("service name must not be empty"));
        }
        self.server.http.validate()?;
        self.server.tls.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    ///
    /// Sets up the tracing subscriber for logging based on the LoggingConfig.
    ///
    /// NOTE: This should be called early during startup to ensure logging is configured
    ///       before any log messages are emitted.
    ///
    pub fn setup_tracing(&self) {
        use tracing_subscriber::{EnvFilter, prelude::*};
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.logging.level.clone()));
        match self.logging.format {
            LogFormat::Json => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer().json())
                    .with(env_filter)
                    .try_init();
            }
            LogFormat::Default => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer())
                    .with(env_filter)
                    .try_init();
            }
            LogFormat::Compact => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer().compact())
                    .with(env_filter)
                    .try_init();
            }
            LogFormat::Pretty => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer().pretty())
                    .with(env_filter)
                    .try_init();
            }
        }
    }
}

///
/// Parses a configuration string with references to environment variables
/// into a Config struct by substituting the environment variables and then
/// parsing the resulting TOML.
///
impl FromStr for Config {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let substituted = replace_handlebars_with_env(s);
        let raw: toml::Value = toml::from_str(&substituted)?;
        let mut config = Config::deserialize(raw.clone()).map_err(Error::from)?;
        config.raw = Some(raw);
        Ok(config)
    }
}
