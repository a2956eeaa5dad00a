//! Webhook registrations and best-effort HTTP fan-out.
//!
//! Registrations persist in a single local JSON file rewritten atomically
//! (write-temp then rename). A publish triggers one POST per matching
//! registration with the body `{"event": …, "timestamp": …, "data": …}`;
//! when a secret is configured the request carries
//! `X-Signature: sha256=<hex HMAC-SHA256(secret, body)>`. Deliveries are
//! parallel, bounded per-request and as a group, and never retried: a
//! non-2xx answer or timeout is logged and dropped.

use {
    super::ActionMessage,
    crate::config::ActionsConfig,
    crate::{Error, Result},
    hmac::{Hmac, Mac},
    parking_lot::RwLock,
    serde::{Deserialize, Serialize},
    sha2::Sha256,
    std::collections::HashMap,
    std::fmt::Write as _,
    std::fs,
    std::path::{Path, PathBuf},
    std::time::Duration,
    tokio::task::JoinSet,
    uuid::Uuid,
};

/// One persisted webhook row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRegistration {
    /// Stable registration ID.
    pub id: String,
    /// The action name this webhook receives.
    pub event: String,
    /// Target URL, POSTed on every matching publish.
    pub url: String,
    /// Extra headers attached to each delivery.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Optional HMAC-SHA256 signing secret.
    #[serde(default)]
    pub secret: Option<String>,
    /// Disabled registrations are kept but skipped at delivery time.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Creation time in nanoseconds since the Unix epoch.
    pub created_at: i64,
}

fn default_enabled() -> bool {
    true
}

impl WebhookRegistration {
    /// Creates an enabled registration with a fresh ID.
    pub fn new(event: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event: event.into(),
            url: url.into(),
            headers: HashMap::new(),
            secret: None,
            enabled: true,
            created_at: crate::utils::unix_nanos(),
        }
    }

    /// Sets the signing secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Adds a delivery header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// File-backed registry of webhook registrations.
pub struct WebhookStore {
    path: PathBuf,
    rows: RwLock<Vec<WebhookRegistration>>,
}

impl WebhookStore {
    /// Creates a store over the given file path. Nothing is read until
    /// [`load`](Self::load).
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            rows: RwLock::new(Vec::new()),
        }
    }

    /// Loads registrations from disk. A missing file is an empty store.
    pub fn load(&self) -> Result<()> {
        let rows = match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| Error::io(format!("corrupt webhook store: {err}")))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        *self.rows.write() = rows;
        Ok(())
    }

    fn persist(&self, rows: &[WebhookRegistration]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(rows)
            .map_err(|err| Error::io(format!("webhook store encoding: {err}")))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Adds a registration and persists the store.
    pub fn register(&self, registration: WebhookRegistration) -> Result<()> {
        let mut rows = self.rows.write();
        rows.push(registration);
        self.persist(&rows)
    }

    /// Removes a registration by ID and persists the store. Returns `true`
    /// when a row was removed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|row| row.id != id);
        let removed = rows.len() != before;
        if removed {
            self.persist(&rows)?;
        }
        Ok(removed)
    }

    /// Returns the registrations matching an event, enabled ones only.
    pub fn matching(&self, event: &str) -> Vec<WebhookRegistration> {
        self.rows
            .read()
            .iter()
            .filter(|row| row.enabled && row.event == event)
            .cloned()
            .collect()
    }

    /// Returns all registrations.
    pub fn list(&self) -> Vec<WebhookRegistration> {
        self.rows.read().clone()
    }

    /// Returns the number of registrations.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns `true` when no registrations exist.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[derive(Serialize)]
struct DeliveryBody<'a> {
    event: &'a str,
    timestamp: i64,
    data: &'a serde_json::Value,
}

/// Delivers published actions to registered webhooks.
pub struct WebhookDispatcher {
    store: WebhookStore,
    client: reqwest::Client,
    delivery_timeout: Duration,
    group_timeout: Duration,
}

impl WebhookDispatcher {
    /// Creates a dispatcher over the store at `path`.
    pub fn new(path: impl AsRef<Path>, config: &ActionsConfig) -> Self {
        Self {
            store: WebhookStore::new(path),
            client: reqwest::Client::new(),
            delivery_timeout: config.delivery_timeout,
            group_timeout: config.group_timeout,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &WebhookStore {
        &self.store
    }

    /// Delivers one message to every matching registration.
    ///
    /// Best-effort: each failure is logged and dropped. The group as a
    /// whole is abandoned at the group timeout.
    pub async fn deliver(&self, message: &ActionMessage) {
        let targets = self.store.matching(&message.action);
        if targets.is_empty() {
            return;
        }

        let body = DeliveryBody {
            event: &message.action,
            timestamp: message.timestamp,
            data: &message.payload,
        };
        let payload = match serde_json::to_vec(&body) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "webhook body encoding failed");
                return;
            }
        };

        let mut deliveries = JoinSet::new();
        for target in targets {
            let client = self.client.clone();
            let payload = payload.clone();
            let timeout = self.delivery_timeout;
            deliveries.spawn(async move {
                let outcome = deliver_one(&client, &target, payload, timeout).await;
                (target, outcome)
            });
        }

        let group = async {
            while let Some(joined) = deliveries.join_next().await {
                match joined {
                    Ok((target, Ok(status))) => {
                        tracing::debug!(url = %target.url, status, "webhook delivered");
                    }
                    Ok((target, Err(err))) => {
                        tracing::warn!(url = %target.url, error = %err, "webhook delivery failed");
                    }
                    Err(join_err) => {
                        tracing::error!(error = %join_err, "webhook delivery task panicked");
                    }
                }
            }
        };

        if tokio::time::timeout(self.group_timeout, group).await.is_err() {
            tracing::warn!(
                event = %message.action,
                timeout = ?self.group_timeout,
                "webhook delivery group timed out"
            );
        }
    }
}

async fn deliver_one(
    client: &reqwest::Client,
    target: &WebhookRegistration,
    payload: Vec<u8>,
    timeout: Duration,
) -> Result<u16> {
    let mut request = client
        .post(&target.url)
        .timeout(timeout)
        .header(http::header::CONTENT_TYPE.as_str(), "application/json");

    for (name, value) in &target.headers {
        request = request.header(name, value);
    }

    if let Some(secret) = &target.secret {
        let signature = sign_payload(secret.as_bytes(), &payload);
        request = request.header("X-Signature", format!("sha256={signature}"));
    }

    let response = request
        .body(payload)
        .send()
        .await
        .map_err(|err| Error::io(format!("webhook POST: {err}")))?;

    let status = response.status();
    if status.is_success() {
        Ok(status.as_u16())
    } else {
        Err(Error::io(format!("webhook answered {status}")))
    }
}

/// HMAC-SHA256 of the body, hex-encoded.
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    let digest = mac.finalize().into_bytes();

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
