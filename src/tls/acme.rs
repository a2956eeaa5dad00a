//! ACME mode: rustls-acme wiring and the on-disk certificate cache.

use {
    super::{LoggingResolver, ParsedCertificate},
    crate::config::TlsConfig,
    crate::{Error, Result},
    futures::StreamExt,
    rustls::ServerConfig,
    rustls_acme::{AcmeConfig, caches::DirCache},
    std::path::Path,
    std::sync::Arc,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
};

/// Let's Encrypt production directory, the default when no override is
/// configured.
const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Builds the ACME-backed server configuration and spawns the order-flow
/// driver task.
///
/// The certificate cache directory is created with mode 0700 before the
/// ACME state touches it. The driver task pumps the rustls-acme event
/// stream (orders, challenges, renewals) until the manager scope is
/// cancelled.
pub(crate) fn build_acme_config(
    config: &TlsConfig,
    cancel: CancellationToken,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Result<Arc<ServerConfig>> {
    let email = config
        .email
        .as_deref()
        .ok_or_else(|| Error::tls("ACME mode requires a contact email"))?;

    ensure_cache_dir(&config.cache_dir)?;

    let directory_url = config
        .directory_url
        .clone()
        .unwrap_or_else(|| LETS_ENCRYPT_PRODUCTION.to_string());

    let mut state = AcmeConfig::new(config.domains.iter().cloned())
        .contact([format!("mailto:{email}")])
        .cache(DirCache::new(config.cache_dir.clone()))
        .directory(directory_url)
        .state();

    let resolver = Arc::new(LoggingResolver::new(state.resolver()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut server_config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| Error::tls(format!("protocol versions: {err}")))?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    let driver = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("ACME driver cancelled");
                    break;
                }
                event = state.next() => match event {
                    Some(Ok(ok)) => tracing::info!(event = ?ok, "ACME event"),
                    Some(Err(err)) => tracing::error!(error = ?err, "ACME error"),
                    None => break,
                },
            }
        }
    });
    tasks.push(driver);

    Ok(Arc::new(server_config))
}

/// Creates the cache directory with owner-only permissions.
fn ensure_cache_dir(dir: &str) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Parses every certificate found in the cache directory.
///
/// Cache files are PEM or DER blobs written by rustls-acme; anything that
/// fails to parse is logged and skipped, since a torn write must never
/// take the status surface down.
pub(crate) fn parse_cached_certificates(dir: &str) -> Vec<ParsedCertificate> {
    let mut parsed = Vec::new();
    let entries = match std::fs::read_dir(Path::new(dir)) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!(dir = %dir, error = %err, "certificate cache not readable");
            return parsed;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(file = %path.display(), error = %err, "cache file unreadable");
                continue;
            }
        };

        let ders: Vec<Vec<u8>> = if bytes.starts_with(b"-----BEGIN") {
            rustls_pemfile::certs(&mut bytes.as_slice())
                .filter_map(|item| item.ok())
                .map(|der| der.as_ref().to_vec())
                .collect()
        } else {
            vec![bytes]
        };

        for der in ders {
            match ParsedCertificate::from_der(&der) {
                Ok(cert) => parsed.push(cert),
                Err(err) => {
                    tracing::debug!(file = %path.display(), error = %err, "not a certificate");
                }
            }
        }
    }

    parsed
}
