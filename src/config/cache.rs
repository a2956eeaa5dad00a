use {serde::Deserialize, std::time::Duration};

/// Eviction policy for the cache engine.
///
/// Only FIFO is implemented. Unknown values deserialize via
/// [`CacheConfig::normalized_eviction`], which warns and falls back rather
/// than failing startup, so configs written against future versions keep
/// working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Fifo,
}

///
/// Configuration for the cache engine.
///
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Whether the cache engine starts with the service. Defaults to true.
    #[serde(default = "CacheConfig::default_enabled")]
    pub enabled: bool,

    /// Backend name resolved through the cache registry.
    /// The default `backend` is "memory".
    #[serde(default = "CacheConfig::default_backend")]
    pub backend: String,

    /// Maximum number of entries before FIFO eviction kicks in.
    /// The default `max_entries` is 10000.
    #[serde(default = "CacheConfig::default_max_entries")]
    pub max_entries: usize,

    /// TTL applied when a caller passes a zero or negative TTL.
    /// The default `default_ttl` is 1 hour.
    #[serde(default = "CacheConfig::default_default_ttl", with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Upper bound on any entry TTL; larger requests are clamped.
    /// The default `max_ttl` is 24 hours.
    #[serde(default = "CacheConfig::default_max_ttl", with = "humantime_serde")]
    pub max_ttl: Duration,

    /// How often the background cleanup pass removes expired entries.
    /// The default `cleanup_interval` is 5 minutes.
    #[serde(
        default = "CacheConfig::default_cleanup_interval",
        with = "humantime_serde"
    )]
    pub cleanup_interval: Duration,

    /// Maximum number of distinct dependency keys tracked before the graph
    /// is compacted to 80% of this value. The default is 10000.
    #[serde(default = "CacheConfig::default_max_dependencies")]
    pub max_dependencies: usize,

    /// Maximum number of dependent cache keys per dependency before the
    /// list is trimmed to its most recent 80%. The default is 1000.
    #[serde(default = "CacheConfig::default_max_dependents_per_key")]
    pub max_dependents_per_key: usize,

    /// Eviction policy. Unrecognized values in the raw config are reported
    /// by `normalized_eviction` and treated as FIFO.
    #[serde(default)]
    pub eviction: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            backend: Self::default_backend(),
            max_entries: Self::default_max_entries(),
            default_ttl: Self::default_default_ttl(),
            max_ttl: Self::default_max_ttl(),
            cleanup_interval: Self::default_cleanup_interval(),
            max_dependencies: Self::default_max_dependencies(),
            max_dependents_per_key: Self::default_max_dependents_per_key(),
            eviction: String::new(),
        }
    }
}

impl CacheConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_backend() -> String {
        "memory".into()
    }

    fn default_max_entries() -> usize {
        10_000
    }

    fn default_default_ttl() -> Duration {
        Duration::from_secs(60 * 60)
    }

    fn default_max_ttl() -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    fn default_cleanup_interval() -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn default_max_dependencies() -> usize {
        10_000
    }

    fn default_max_dependents_per_key() -> usize {
        1_000
    }

    /// Resolves the configured eviction policy, warning on values this
    /// version does not implement instead of failing startup.
    pub fn normalized_eviction(&self) -> EvictionPolicy {
        match self.eviction.as_str() {
            "" | "fifo" => EvictionPolicy::Fifo,
            other => {
                tracing::warn!(
                    policy = other,
                    "unsupported cache eviction policy, falling back to fifo"
                );
                EvictionPolicy::Fifo
            }
        }
    }
}
