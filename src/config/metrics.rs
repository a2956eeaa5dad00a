use {serde::Deserialize, std::time::Duration};

///
/// Configuration for the metrics facade and the system collector.
///
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are collected at all. Defaults to true.
    #[serde(default = "MetricsConfig::default_enabled")]
    pub enabled: bool,

    /// Backend name resolved through the metrics registry
    /// ("memory" or "prometheus"). The default `backend` is "memory".
    #[serde(default = "MetricsConfig::default_backend")]
    pub backend: String,

    /// Whether the process-level system collector runs.
    /// Defaults to true.
    #[serde(default = "MetricsConfig::default_system_collector")]
    pub system_collector: bool,

    /// Cadence of the expensive process sample (memory, CPU estimate).
    /// The default `heavy_interval` is 15 seconds.
    #[serde(
        default = "MetricsConfig::default_heavy_interval",
        with = "humantime_serde"
    )]
    pub heavy_interval: Duration,

    /// Cadence of the cheap sample (uptime, task gauges).
    /// The default `light_interval` is 5 seconds.
    #[serde(
        default = "MetricsConfig::default_light_interval",
        with = "humantime_serde"
    )]
    pub light_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            backend: Self::default_backend(),
            system_collector: Self::default_system_collector(),
            heavy_interval: Self::default_heavy_interval(),
            light_interval: Self::default_light_interval(),
        }
    }
}

impl MetricsConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_backend() -> String {
        "memory".into()
    }

    fn default_system_collector() -> bool {
        true
    }

    fn default_heavy_interval() -> Duration {
        Duration::from_secs(15)
    }

    fn default_light_interval() -> Duration {
        Duration::from_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.backend, "memory");
        assert!(config.system_collector);
        assert_eq!(config.heavy_interval, Duration::from_secs(15));
        assert_eq!(config.light_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_backend() {
        let config: MetricsConfig = toml::from_str(r#"backend = "prometheus""#).unwrap();
        assert_eq!(config.backend, "prometheus");
    }
}
