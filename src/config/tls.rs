use {crate::Result, serde::Deserialize, std::time::Duration};

///
/// Configuration for TLS termination and certificate management.
///
/// Two modes are supported:
///
/// - **Static**: `cert_file` and `key_file` point at PEM files on disk.
/// - **ACME**: a non-empty `domains` list plus a contact `email` enables
///   automatic issuance against Let's Encrypt (or the directory named by
///   `directory_url`), with certificates cached under `cache_dir`.
///
/// Setting both a key pair and a domain list is rejected at validation so the
/// active mode is always unambiguous.
///
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsConfig {
    /// Whether the server terminates TLS at all. Defaults to false.
    #[serde(default)]
    pub enabled: bool,

    /// Path to a PEM-encoded certificate chain (static mode).
    #[serde(default)]
    pub cert_file: Option<String>,

    /// Path to a PEM-encoded private key (static mode).
    #[serde(default)]
    pub key_file: Option<String>,

    /// Domains the ACME account is allowed to issue for. A non-empty list
    /// selects ACME mode; issuance for any other SNI name is refused.
    #[serde(default)]
    pub domains: Vec<String>,

    /// ACME account contact email. Required in ACME mode.
    #[serde(default)]
    pub email: Option<String>,

    /// Optional ACME directory URL override. When None, the Let's Encrypt
    /// production directory is used.
    #[serde(default)]
    pub directory_url: Option<String>,

    /// Directory for the on-disk certificate cache (created mode 0700).
    /// The default `cache_dir` is "./certs".
    #[serde(default = "TlsConfig::default_cache_dir")]
    pub cache_dir: String,

    /// How often the renewal loop re-examines the certificate set.
    /// The default `renewal_interval` is 12 hours.
    #[serde(
        default = "TlsConfig::default_renewal_interval",
        with = "humantime_serde"
    )]
    pub renewal_interval: Duration,

    /// Certificates expiring within this window are considered due for
    /// renewal. The default `renew_before` is 30 days.
    #[serde(default = "TlsConfig::default_renew_before", with = "humantime_serde")]
    pub renew_before: Duration,

    /// Upper bound on the certificate preload pass at startup.
    /// The default `preload_timeout` is 60 seconds.
    #[serde(
        default = "TlsConfig::default_preload_timeout",
        with = "humantime_serde"
    )]
    pub preload_timeout: Duration,
}

impl TlsConfig {
    fn default_cache_dir() -> String {
        "./certs".into()
    }

    fn default_renewal_interval() -> Duration {
        Duration::from_secs(12 * 60 * 60)
    }

    fn default_renew_before() -> Duration {
        Duration::from_secs(30 * 24 * 60 * 60)
    }

    fn default_preload_timeout() -> Duration {
        Duration::from_secs(60)
    }

    /// Returns `true` when ACME mode is selected.
    pub fn is_acme(&self) -> bool {
        !self.domains.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let has_pair = self.cert_file.is_some() && self.key_file.is_some();
        let has_partial_pair = self.cert_file.is_some() != self.key_file.is_some();

        if has_partial_pair {
            return Err(crate::Error::invalid_input(
                "TLS cert_file and key_file must be provided together",
            ));
        }

        if has_pair && self.is_acme() {
            return Err(crate::Error::invalid_input(
                "TLS is ambiguous: configure either cert_file/key_file or a domains list, not both",
            ));
        }

        if !has_pair && !self.is_acme() {
            return Err(crate::Error::invalid_input(
                "TLS is enabled but neither a key pair nor an ACME domain list is configured",
            ));
        }

        if self.is_acme() && self.email.as_deref().unwrap_or("").trim().is_empty() {
            return Err(crate::Error::invalid_input(
                "ACME mode requires a contact email. Set [server.tls] email = \"ops@example.com\".",
            ));
        }

        if self.is_acme() && self.cache_dir.trim().is_empty() {
            return Err(crate::Error::invalid_input(
                "ACME mode requires a cache_dir for the certificate cache",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_validates() {
        let config = TlsConfig::default();
        assert!(!config.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_static_mode_validates() {
        let config: TlsConfig = toml::from_str(
            r#"
enabled = true
cert_file = "/etc/ssl/server.crt"
key_file = "/etc/ssl/server.key"
"#,
        )
        .unwrap();
        assert!(!config.is_acme());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_pair_rejected() {
        let config: TlsConfig = toml::from_str(
            r#"
enabled = true
cert_file = "/etc/ssl/server.crt"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_acme_mode_requires_email() {
        let config: TlsConfig = toml::from_str(
            r#"
enabled = true
domains = ["api.example.com"]
"#,
        )
        .unwrap();
        assert!(config.is_acme());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_acme_mode_validates() {
        let config: TlsConfig = toml::from_str(
            r#"
enabled = true
domains = ["api.example.com", "www.example.com"]
email = "ops@example.com"
"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_dir, "./certs");
        assert_eq!(config.renewal_interval, Duration::from_secs(12 * 60 * 60));
        assert_eq!(config.renew_before, Duration::from_secs(30 * 24 * 60 * 60));
    }

    #[test]
    fn test_both_modes_rejected() {
        let config: TlsConfig = toml::from_str(
            r#"
enabled = true
cert_file = "/etc/ssl/server.crt"
key_file = "/etc/ssl/server.key"
domains = ["api.example.com"]
email = "ops@example.com"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_without_material_rejected() {
        let config: TlsConfig = toml::from_str("enabled = true").unwrap();
        assert!(config.validate().is_err());
    }
}
