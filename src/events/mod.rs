//! In-process action bus with optional webhook fan-out.
//!
//! Local delivery is at-most-once: handlers subscribed to an action run
//! synchronously in the publisher's task, wrapped so a panicking subscriber
//! is logged and never takes down the publisher. When a webhook store is
//! configured, a publish additionally fans out to the registered URLs in a
//! bounded background group (see [`webhook`]).

mod webhook;

pub use webhook::{WebhookDispatcher, WebhookRegistration, WebhookStore};

use {
    crate::config::ActionsConfig,
    crate::lifecycle::{Component, Lifecycle},
    crate::middleware::panic_message,
    crate::utils::unix_nanos,
    crate::{Error, Result},
    async_trait::async_trait,
    parking_lot::RwLock,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::collections::HashMap,
    std::sync::Arc,
    uuid::Uuid,
};

/// One published action as observed by subscribers and webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMessage {
    /// The action name the message was published under.
    pub action: String,
    /// The publisher-supplied payload.
    pub payload: Value,
    /// The logical publisher, defaulting to the service name.
    pub source: String,
    /// Publish time in nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Free-form metadata pairs.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Unique message ID, generated when the publisher supplies none.
    pub message_id: String,
}

impl ActionMessage {
    /// Creates a message with a fresh ID and the current timestamp.
    pub fn new(action: impl Into<String>, payload: Value, source: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            payload,
            source: source.into(),
            timestamp: unix_nanos(),
            metadata: HashMap::new(),
            message_id: Uuid::new_v4().to_string(),
        }
    }
}

/// A local subscriber invoked for each message of its action.
pub type ActionHandler = Arc<dyn Fn(&ActionMessage) + Send + Sync>;

/// The publish/subscribe action bus.
///
/// Subscriptions may be added and removed at any time; publishing requires
/// the component to be running so webhook delivery has a live scope to run
/// under.
pub struct ActionBus {
    lifecycle: Lifecycle,
    source: String,
    subscribers: RwLock<HashMap<String, Vec<ActionHandler>>>,
    dispatcher: Option<Arc<WebhookDispatcher>>,
}

impl ActionBus {
    /// Creates a bus for the given service name and actions configuration.
    ///
    /// When `webhook_store_path` is configured, registrations are loaded at
    /// `start()` and every publish fans out to matching webhooks.
    pub fn new(source: impl Into<String>, config: &ActionsConfig) -> Self {
        let dispatcher = config
            .webhook_store_path
            .as_ref()
            .map(|path| Arc::new(WebhookDispatcher::new(path, config)));
        Self {
            lifecycle: Lifecycle::new("actions"),
            source: source.into(),
            subscribers: RwLock::new(HashMap::new()),
            dispatcher,
        }
    }

    /// Registers a handler for an action.
    pub fn subscribe(&self, action: impl Into<String>, handler: ActionHandler) {
        self.subscribers
            .write()
            .entry(action.into())
            .or_default()
            .push(handler);
    }

    /// Removes every handler registered for an action. Idempotent.
    pub fn unsubscribe(&self, action: &str) {
        self.subscribers.write().remove(action);
    }

    /// Returns the number of handlers registered for an action.
    pub fn subscriber_count(&self, action: &str) -> usize {
        self.subscribers
            .read()
            .get(action)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Returns the webhook store when fan-out is configured.
    pub fn webhook_store(&self) -> Option<&WebhookStore> {
        self.dispatcher.as_ref().map(|d| d.store())
    }

    /// Publishes a payload under an action name.
    ///
    /// Local handlers run synchronously, each isolated against panics.
    /// Webhook fan-out runs in a background task bounded by the configured
    /// group timeout; its failures are best-effort and logged only.
    /// Returns the published message.
    pub async fn publish(&self, action: &str, payload: Value) -> Result<ActionMessage> {
        self.lifecycle.ensure_running().map_err(|_| {
            Error::not_running("action bus")
        })?;

        let message = ActionMessage::new(action, payload, self.source.clone());
        self.deliver_local(&message);

        if let Some(dispatcher) = &self.dispatcher {
            let dispatcher = Arc::clone(dispatcher);
            let message = message.clone();
            let cancel = self.lifecycle.cancellation_token();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(action = %message.action, "webhook fan-out cancelled by shutdown");
                    }
                    _ = dispatcher.deliver(&message) => {}
                }
            });
        }

        Ok(message)
    }

    fn deliver_local(&self, message: &ActionMessage) {
        let handlers: Vec<ActionHandler> = self
            .subscribers
            .read()
            .get(&message.action)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(message);
            }));
            if let Err(panic) = outcome {
                tracing::error!(
                    action = %message.action,
                    message_id = %message.message_id,
                    panic = %panic_message(&panic),
                    "action subscriber panicked"
                );
            }
        }
    }
}

#[async_trait]
impl Component for ActionBus {
    fn name(&self) -> &str {
        "actions"
    }

    async fn start(&self) -> Result<()> {
        let guard = self.lifecycle.begin_start()?;
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.store().load()?;
            tracing::info!(
                webhooks = dispatcher.store().len(),
                "action bus started with webhook fan-out"
            );
        } else {
            tracing::info!("action bus started");
        }
        guard.complete();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.begin_stop()?;
        tracing::info!("action bus stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}
