//! Health probe registry.
//!
//! Applications register named probes; the manager evaluates them on
//! demand and on a background interval, keeping the latest result per
//! probe. Probe failures are ordinary results, never errors: an unhealthy
//! dependency is a state to report, not a fault to propagate.

use {
    crate::config::HealthConfig,
    crate::lifecycle::{Component, Lifecycle},
    crate::Result,
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    futures::future::BoxFuture,
    parking_lot::{Mutex, RwLock},
    serde::Serialize,
    std::collections::HashMap,
    std::sync::Arc,
    std::time::{Duration, Instant},
    tokio::task::JoinHandle,
};

/// The reported state of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// The probe has not run yet.
    Unknown,
}

/// The latest evaluation of one probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub last_check: DateTime<Utc>,
    /// How long the probe took to answer.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

/// An async health probe returning a status and a human-readable message.
pub type Probe =
    Arc<dyn Fn() -> BoxFuture<'static, (HealthStatus, String)> + Send + Sync + 'static>;

/// Registry of health probes with cached results.
pub struct HealthManager {
    lifecycle: Lifecycle,
    config: HealthConfig,
    probes: Arc<RwLock<HashMap<String, Probe>>>,
    results: Arc<RwLock<HashMap<String, ProbeResult>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthManager {
    /// Creates a manager from configuration.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new("health"),
            config,
            probes: Arc::new(RwLock::new(HashMap::new())),
            results: Arc::new(RwLock::new(HashMap::new())),
            task: Mutex::new(None),
        }
    }

    /// Registers a probe under a name, replacing any previous registration.
    pub fn register_probe(&self, name: impl Into<String>, probe: Probe) {
        let name = name.into();
        self.results.write().insert(
            name.clone(),
            ProbeResult {
                name: name.clone(),
                status: HealthStatus::Unknown,
                message: "not checked yet".into(),
                last_check: Utc::now(),
                duration: Duration::ZERO,
            },
        );
        self.probes.write().insert(name, probe);
    }

    /// Removes a probe and its cached result.
    pub fn unregister_probe(&self, name: &str) {
        self.probes.write().remove(name);
        self.results.write().remove(name);
    }

    /// Runs every registered probe once and refreshes the cached results.
    pub async fn check_all(&self) -> Vec<ProbeResult> {
        let probes: Vec<(String, Probe)> = self
            .probes
            .read()
            .iter()
            .map(|(name, probe)| (name.clone(), Arc::clone(probe)))
            .collect();

        let mut refreshed = Vec::with_capacity(probes.len());
        for (name, probe) in probes {
            let started = Instant::now();
            let (status, message) = probe().await;
            let result = ProbeResult {
                name: name.clone(),
                status,
                message,
                last_check: Utc::now(),
                duration: started.elapsed(),
            };
            self.results.write().insert(name, result.clone());
            refreshed.push(result);
        }

        refreshed.sort_by(|a, b| a.name.cmp(&b.name));
        refreshed
    }

    /// Returns the cached results without re-running any probe.
    pub fn snapshot(&self) -> Vec<ProbeResult> {
        let mut results: Vec<ProbeResult> = self.results.read().values().cloned().collect();
        results.sort_by(|a, b| a.name.cmp(&b.name));
        results
    }

    /// Returns `true` when every probe's latest result is healthy.
    pub fn is_healthy(&self) -> bool {
        self.results
            .read()
            .values()
            .all(|result| result.status == HealthStatus::Healthy)
    }
}

#[async_trait]
impl Component for HealthManager {
    fn name(&self) -> &str {
        "health"
    }

    async fn start(&self) -> Result<()> {
        let guard = self.lifecycle.begin_start()?;

        if self.config.enabled {
            let cancel = self.lifecycle.cancellation_token();
            let interval = self.config.interval;
            let runner = BackgroundRunner {
                probes: Arc::clone(&self.probes),
                results: Arc::clone(&self.results),
            };
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => runner.run_once().await,
                    }
                }
            });
            *self.task.lock() = Some(task);
        }

        guard.complete();
        tracing::info!(enabled = self.config.enabled, "health manager started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.begin_stop()?;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::info!("health manager stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

struct BackgroundRunner {
    probes: Arc<RwLock<HashMap<String, Probe>>>,
    results: Arc<RwLock<HashMap<String, ProbeResult>>>,
}

impl BackgroundRunner {
    async fn run_once(&self) {
        let probes: Vec<(String, Probe)> = self
            .probes
            .read()
            .iter()
            .map(|(name, probe)| (name.clone(), Arc::clone(probe)))
            .collect();

        for (name, probe) in probes {
            let started = Instant::now();
            let (status, message) = probe().await;
            if status == HealthStatus::Unhealthy {
                tracing::warn!(probe = %name, message = %message, "health probe unhealthy");
            }
            self.results.write().insert(
                name.clone(),
                ProbeResult {
                    name,
                    status,
                    message,
                    last_check: Utc::now(),
                    duration: started.elapsed(),
                },
            );
        }
    }
}
