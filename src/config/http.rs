use {crate::Result, serde::Deserialize, std::time::Duration};

///
/// Configuration for the HTTP server
///
/// This configuration includes the settings that control the behavior of the
/// HTTP server, including binding address and port, request limits and
/// timeouts.
///
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// IP address to bind the HTTP server to
    /// The default `bind_addr` is "127.0.0.1".
    #[serde(default = "HttpConfig::default_bind_addr")]
    pub bind_addr: String,

    /// Port to bind the HTTP server to
    /// The default `bind_port` is 3000.
    #[serde(default = "HttpConfig::default_bind_port")]
    pub bind_port: u16,

    /// Maximum number of concurrently processed requests.
    /// If the number of concurrent requests exceeds this number, new requests
    /// wait for a slot before being dispatched.
    /// By default `max_concurrent_requests` is set to 4096.
    #[serde(default = "HttpConfig::default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,

    /// Maximum allowed time for reading a request from the socket.
    /// By default `read_timeout` is 30 seconds.
    #[serde(default = "HttpConfig::default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Maximum allowed time for writing a response to the socket.
    /// By default `write_timeout` is 30 seconds.
    #[serde(
        default = "HttpConfig::default_write_timeout",
        with = "humantime_serde"
    )]
    pub write_timeout: Duration,

    /// How long an idle keep-alive connection is retained.
    /// By default `idle_timeout` is 120 seconds.
    #[serde(default = "HttpConfig::default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Default per-request deadline applied when a route policy does not
    /// carry its own `timeout`. By default `request_timeout` is None
    /// (no deadline).
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Maximum payload size in bytes for incoming HTTP requests.
    /// Requests with payloads larger than this will be rejected with
    /// a 413 Payload Too Large response.
    /// By default `max_payload_size_bytes` is set to 1MiB.
    #[serde(default = "HttpConfig::default_max_payload_size_bytes")]
    pub max_payload_size_bytes: byte_unit::Byte,

    /// Maximum time to wait for graceful shutdown to complete.
    /// After this timeout, the server will force shutdown.
    /// By default `shutdown_timeout` is set to 10 seconds.
    #[serde(
        default = "HttpConfig::default_shutdown_timeout",
        with = "humantime_serde"
    )]
    pub shutdown_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: Self::default_bind_addr(),
            bind_port: Self::default_bind_port(),
            max_concurrent_requests: Self::default_max_concurrent_requests(),
            read_timeout: Self::default_read_timeout(),
            write_timeout: Self::default_write_timeout(),
            idle_timeout: Self::default_idle_timeout(),
            request_timeout: None,
            max_payload_size_bytes: Self::default_max_payload_size_bytes(),
            shutdown_timeout: Self::default_shutdown_timeout(),
        }
    }
}

impl HttpConfig {
    ///
    /// Returns the full bind address as a string in the format "IP:PORT".
    ///
    pub fn full_bind_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.bind_port)
    }

    fn default_bind_addr() -> String {
        "127.0.0.1".into()
    }

    fn default_bind_port() -> u16 {
        3000
    }

    fn default_max_concurrent_requests() -> u32 {
        4096
    }

    fn default_read_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn default_write_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn default_idle_timeout() -> Duration {
        Duration::from_secs(120)
    }

    fn default_max_payload_size_bytes() -> byte_unit::Byte {
        byte_unit::Byte::from_u64(1024 * 1024)
    }

    fn default_shutdown_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.trim().is_empty() {
            return Err(crate::Error::invalid_input(
                "HTTP bind_addr is required. Set [server.http] bind_addr = \"0.0.0.0\" or \"127.0.0.1\" in config.",
            ));
        }

        if self.bind_addr.parse::<std::net::IpAddr>().is_err() {
            return Err(crate::Error::invalid_input(
                "HTTP bind_addr must be a valid IP address. Examples: \"127.0.0.1\", \"0.0.0.0\", \"::1\"",
            ));
        }

        if self.max_concurrent_requests == 0 {
            return Err(crate::Error::invalid_input(
                "max_concurrent_requests must be greater than zero",
            ));
        }

        if self.max_payload_size_bytes.as_u64() == 0 {
            return Err(crate::Error::invalid_input(
                "max_payload_size_bytes must be greater than zero",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 3000);
        assert_eq!(config.max_concurrent_requests, 4096);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.max_payload_size_bytes.as_u64(), 1024 * 1024);
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn test_full_bind_addr() {
        let mut config = HttpConfig::default();
        config.bind_addr = "0.0.0.0".into();
        config.bind_port = 8080;
        assert_eq!(config.full_bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_validate_empty_bind_addr() {
        let mut config = HttpConfig::default();
        config.bind_addr = "".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_bind_addr() {
        let mut config = HttpConfig::default();
        config.bind_addr = "not-an-ip".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = HttpConfig::default();
        config.max_concurrent_requests = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations_parse_from_humantime() {
        let config: HttpConfig = toml::from_str(
            r#"
bind_port = 9090
read_timeout = "5s"
request_timeout = "250ms"
shutdown_timeout = "3s"
"#,
        )
        .unwrap();
        assert_eq!(config.bind_port, 9090);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    }
}
