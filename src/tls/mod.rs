//! TLS certificate management: static key pairs and ACME auto-provisioning.
//!
//! Two modes, selected by [`crate::config::TlsConfig`]:
//!
//! - **Static**: certificate chain and key are loaded from PEM files and
//!   validated against their validity window. The renewal ticker reloads
//!   them from disk so rotated files are picked up without a restart.
//! - **ACME**: certificates are ordered on demand for the configured
//!   domain allow-list, cached on disk (directory mode 0700) and renewed
//!   automatically. The ACME protocol itself is owned by `rustls-acme`;
//!   this manager contributes the preload pass, the renewal/status loop
//!   and the SNI logging wrapper around certificate resolution.
//!
//! Both modes produce a `rustls::ServerConfig` restricted to TLS 1.2+ with
//! the provider's fixed cipher allow-list.

mod acme;

use {
    crate::config::TlsConfig,
    crate::lifecycle::{Component, Lifecycle},
    crate::{Error, Result},
    async_trait::async_trait,
    chrono::Utc,
    parking_lot::{Mutex, RwLock},
    rustls::ServerConfig,
    rustls::server::{ClientHello, ResolvesServerCert},
    serde::Serialize,
    std::collections::HashMap,
    std::sync::Arc,
    std::time::Duration,
    tokio::task::{JoinHandle, JoinSet},
    tokio_rustls::TlsAcceptor,
    x509_parser::prelude::{FromDer, GeneralName, X509Certificate},
};

/// Health classification of one domain's certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateHealth {
    Valid,
    /// Expires within the renewal window (30 days by default).
    ExpiringSoon,
    Expired,
    Error,
}

/// Status of one domain as reported by the manager.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateStatus {
    pub domain: String,
    pub status: CertificateHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_until_expiry: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Metadata extracted from one parsed certificate.
#[derive(Debug, Clone)]
pub(crate) struct ParsedCertificate {
    pub(crate) subject: String,
    pub(crate) issuer: String,
    pub(crate) names: Vec<String>,
    pub(crate) not_before: i64,
    pub(crate) not_after: i64,
}

impl ParsedCertificate {
    pub(crate) fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|err| Error::tls(format!("certificate parse: {err}")))?;

        let mut names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    names.push((*dns).to_string());
                }
            }
        }

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            names,
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
        })
    }

    pub(crate) fn covers(&self, domain: &str) -> bool {
        self.names.iter().any(|name| {
            name == domain
                || (name.starts_with("*.")
                    && domain
                        .split_once('.')
                        .is_some_and(|(_, rest)| rest == &name[2..]))
        }) || self.subject.contains(domain)
    }

    pub(crate) fn status_for(&self, domain: &str, renew_before: Duration) -> CertificateStatus {
        let now = Utc::now().timestamp();
        let seconds_left = self.not_after - now;
        let days_left = seconds_left / 86_400;

        let status = if now < self.not_before || seconds_left <= 0 {
            CertificateHealth::Expired
        } else if seconds_left <= renew_before.as_secs() as i64 {
            CertificateHealth::ExpiringSoon
        } else {
            CertificateHealth::Valid
        };

        CertificateStatus {
            domain: domain.to_string(),
            status,
            issuer: Some(self.issuer.clone()),
            subject: Some(self.subject.clone()),
            days_until_expiry: Some(days_left),
            error: None,
        }
    }
}

/// Pass-through certificate resolver that logs the SNI name and failures.
pub(crate) struct LoggingResolver {
    inner: Arc<dyn ResolvesServerCert>,
}

impl LoggingResolver {
    pub(crate) fn new(inner: Arc<dyn ResolvesServerCert>) -> Self {
        Self { inner }
    }
}

impl std::fmt::Debug for LoggingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingResolver").finish()
    }
}

impl ResolvesServerCert for LoggingResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<rustls::sign::CertifiedKey>> {
        let sni = client_hello.server_name().map(str::to_owned);
        let resolved = self.inner.resolve(client_hello);
        match (&resolved, sni) {
            (Some(_), Some(name)) => tracing::debug!(sni = %name, "resolved certificate"),
            (None, Some(name)) => tracing::warn!(sni = %name, "no certificate for SNI name"),
            (None, None) => tracing::warn!("no certificate for SNI-less handshake"),
            (Some(_), None) => tracing::debug!("resolved certificate without SNI"),
        }
        resolved
    }
}

/// The TLS certificate manager.
pub struct TlsManager {
    lifecycle: Lifecycle,
    config: TlsConfig,
    server_config: Arc<RwLock<Option<Arc<ServerConfig>>>>,
    statuses: Arc<RwLock<HashMap<String, CertificateStatus>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TlsManager {
    /// Creates a manager from configuration; nothing is loaded until
    /// `start()`.
    pub fn new(config: TlsConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new("tls"),
            config,
            server_config: Arc::new(RwLock::new(None)),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Returns the acceptor for the server listener. Requires Running.
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        self.lifecycle.ensure_running()?;
        let config = self
            .server_config
            .read()
            .clone()
            .ok_or_else(|| Error::tls("TLS manager has no server configuration"))?;
        Ok(TlsAcceptor::from(config))
    }

    /// Per-domain certificate status, sorted by domain.
    pub fn status(&self) -> Vec<CertificateStatus> {
        let mut statuses: Vec<CertificateStatus> =
            self.statuses.read().values().cloned().collect();
        statuses.sort_by(|a, b| a.domain.cmp(&b.domain));
        statuses
    }

    /// Loads the static key pair, validates its window and builds the
    /// server configuration.
    fn load_static(&self) -> Result<()> {
        load_static_material(&self.config, &self.statuses, &self.server_config)
    }

    /// Refreshes per-domain statuses from the on-disk certificate cache.
    fn refresh_statuses(
        config: &TlsConfig,
        statuses: &RwLock<HashMap<String, CertificateStatus>>,
    ) {
        let parsed = acme::parse_cached_certificates(&config.cache_dir);
        for domain in &config.domains {
            let matching = parsed.iter().find(|cert| cert.covers(domain));
            let status = match matching {
                Some(cert) => cert.status_for(domain, config.renew_before),
                None => CertificateStatus {
                    domain: domain.clone(),
                    status: CertificateHealth::Error,
                    issuer: None,
                    subject: None,
                    days_until_expiry: None,
                    error: Some("no cached certificate".into()),
                },
            };
            if status.status == CertificateHealth::ExpiringSoon {
                tracing::info!(
                    domain = %domain,
                    days = status.days_until_expiry,
                    "certificate due for renewal"
                );
            }
            statuses.write().insert(domain.clone(), status);
        }
    }

    /// Parses every cached certificate in parallel, bounded by the preload
    /// timeout. Failures are logged and never fatal.
    async fn preload(&self) {
        let domains = self.config.domains.clone();
        let cache_dir = self.config.cache_dir.clone();
        let renew_before = self.config.renew_before;
        let statuses = Arc::clone(&self.statuses);

        let preload = async move {
            let parsed = Arc::new(acme::parse_cached_certificates(&cache_dir));
            let mut tasks = JoinSet::new();
            for domain in domains {
                let parsed = Arc::clone(&parsed);
                tasks.spawn(async move {
                    let status = parsed
                        .iter()
                        .find(|cert| cert.covers(&domain))
                        .map(|cert| cert.status_for(&domain, renew_before));
                    (domain, status)
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((domain, Some(status))) => {
                        statuses.write().insert(domain, status);
                    }
                    Ok((domain, None)) => {
                        tracing::info!(domain = %domain, "no cached certificate, will order on first handshake");
                        statuses.write().insert(
                            domain.clone(),
                            CertificateStatus {
                                domain,
                                status: CertificateHealth::Error,
                                issuer: None,
                                subject: None,
                                days_until_expiry: None,
                                error: Some("no cached certificate yet".into()),
                            },
                        );
                    }
                    Err(err) => tracing::warn!(error = %err, "certificate preload task failed"),
                }
            }
        };

        if tokio::time::timeout(self.config.preload_timeout, preload)
            .await
            .is_err()
        {
            tracing::warn!(
                timeout = ?self.config.preload_timeout,
                "certificate preload timed out"
            );
        }
    }
}

/// Loads the static key pair from disk, validates its window, and installs
/// a fresh server configuration. Shared by `start()` and the renewal
/// ticker so certificate rotation on disk is picked up without a restart.
fn load_static_material(
    config: &TlsConfig,
    statuses: &RwLock<HashMap<String, CertificateStatus>>,
    server_config: &RwLock<Option<Arc<ServerConfig>>>,
) -> Result<()> {
    let cert_path = config
        .cert_file
        .as_deref()
        .ok_or_else(|| Error::tls("static mode requires cert_file"))?;
    let key_path = config
        .key_file
        .as_deref()
        .ok_or_else(|| Error::tls("static mode requires key_file"))?;

    let cert_pem = std::fs::read(cert_path)?;
    let certs: Vec<rustls::pki_types::CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<std::result::Result<_, _>>()
            .map_err(|err| Error::tls(format!("certificate PEM: {err}")))?;
    if certs.is_empty() {
        return Err(Error::tls(format!("no certificates in {cert_path}")));
    }

    let key_pem = std::fs::read(key_path)?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|err| Error::tls(format!("private key PEM: {err}")))?
        .ok_or_else(|| Error::tls(format!("no private key in {key_path}")))?;

    // Reject certificates outside their validity window up front; a
    // misconfigured deployment should fail at startup, not at the first
    // handshake.
    let parsed = ParsedCertificate::from_der(certs[0].as_ref())?;
    let now = Utc::now().timestamp();
    if now < parsed.not_before || now > parsed.not_after {
        return Err(Error::tls(format!(
            "certificate {cert_path} is outside its validity window"
        )));
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let signing_key = provider
        .key_provider
        .load_private_key(key)
        .map_err(|err| Error::tls(format!("private key load: {err}")))?;
    let certified = Arc::new(rustls::sign::CertifiedKey::new(certs, signing_key));

    struct StaticResolver {
        certified: Arc<rustls::sign::CertifiedKey>,
    }
    impl std::fmt::Debug for StaticResolver {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("StaticResolver").finish()
        }
    }
    impl ResolvesServerCert for StaticResolver {
        fn resolve(
            &self,
            _client_hello: ClientHello<'_>,
        ) -> Option<Arc<rustls::sign::CertifiedKey>> {
            Some(Arc::clone(&self.certified))
        }
    }

    let resolver = Arc::new(LoggingResolver::new(Arc::new(StaticResolver { certified })));
    let mut new_config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| Error::tls(format!("protocol versions: {err}")))?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    new_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    let domain = parsed
        .names
        .first()
        .cloned()
        .unwrap_or_else(|| parsed.subject.clone());
    let status = parsed.status_for(&domain, config.renew_before);
    statuses.write().insert(domain, status);

    *server_config.write() = Some(Arc::new(new_config));
    Ok(())
}

#[async_trait]
impl Component for TlsManager {
    fn name(&self) -> &str {
        "tls"
    }

    async fn start(&self) -> Result<()> {
        let guard = self.lifecycle.begin_start()?;

        if !self.config.enabled {
            guard.complete();
            tracing::debug!("TLS disabled, manager idle");
            return Ok(());
        }

        if self.config.is_acme() {
            let server_config = acme::build_acme_config(
                &self.config,
                self.lifecycle.cancellation_token(),
                &mut self.tasks.lock(),
            )?;
            *self.server_config.write() = Some(server_config);
            self.preload().await;
        } else {
            self.load_static()?;
        }

        // Renewal ticker: re-examines the certificate set and reloads
        // static material when due.
        let cancel = self.lifecycle.cancellation_token();
        let config = self.config.clone();
        let statuses = Arc::clone(&self.statuses);
        let server_config = Arc::clone(&self.server_config);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.renewal_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if config.is_acme() {
                            Self::refresh_statuses(&config, &statuses);
                        } else if let Err(err) =
                            load_static_material(&config, &statuses, &server_config)
                        {
                            tracing::warn!(error = %err, "static certificate reload failed");
                        }
                    }
                }
            }
        });
        self.tasks.lock().push(ticker);

        guard.complete();
        tracing::info!(
            mode = if self.config.is_acme() { "acme" } else { "static" },
            domains = self.config.domains.len(),
            "TLS manager started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.begin_stop()?;
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            // The scope is cancelled; anything still running is abandoned.
            task.abort();
        }
        *self.server_config.write() = None;
        tracing::info!("TLS manager stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}
