use {serde::Deserialize, std::time::Duration};

///
/// Configuration for the action bus and webhook fan-out.
///
#[derive(Debug, Clone, Deserialize)]
pub struct ActionsConfig {
    /// Whether the event dispatcher starts with the service. Defaults to true.
    #[serde(default = "ActionsConfig::default_enabled")]
    pub enabled: bool,

    /// Path of the local webhook registration file. When None, webhook
    /// fan-out is disabled and publishes stay in-process.
    #[serde(default)]
    pub webhook_store_path: Option<String>,

    /// Per-request timeout for a single webhook delivery.
    /// The default `delivery_timeout` is 5 seconds.
    #[serde(
        default = "ActionsConfig::default_delivery_timeout",
        with = "humantime_serde"
    )]
    pub delivery_timeout: Duration,

    /// Upper bound on one publish's whole delivery group.
    /// The default `group_timeout` is 30 seconds.
    #[serde(
        default = "ActionsConfig::default_group_timeout",
        with = "humantime_serde"
    )]
    pub group_timeout: Duration,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            webhook_store_path: None,
            delivery_timeout: Self::default_delivery_timeout(),
            group_timeout: Self::default_group_timeout(),
        }
    }
}

impl ActionsConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_delivery_timeout() -> Duration {
        Duration::from_secs(5)
    }

    fn default_group_timeout() -> Duration {
        Duration::from_secs(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ActionsConfig::default();
        assert!(config.enabled);
        assert!(config.webhook_store_path.is_none());
        assert_eq!(config.delivery_timeout, Duration::from_secs(5));
        assert_eq!(config.group_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse() {
        let config: ActionsConfig = toml::from_str(
            r#"
webhook_store_path = "/var/lib/svc/webhooks.json"
delivery_timeout = "2s"
"#,
        )
        .unwrap();
        assert_eq!(
            config.webhook_store_path.as_deref(),
            Some("/var/lib/svc/webhooks.json")
        );
        assert_eq!(config.delivery_timeout, Duration::from_secs(2));
    }
}
