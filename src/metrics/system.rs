//! Process-level system metrics sampler.
//!
//! Samples run at two cadences: a heavy pass (resident memory and the CPU
//! estimate, default 15s) and a light pass (uptime and thread gauges,
//! default 5s). The heavy sample is cached between passes so a burst of
//! light ticks never re-reads process accounting.
//!
//! The CPU estimate is derived from the growth of process CPU time over
//! wall-clock time, divided by the logical CPU count and clamped to
//! [0, 100].

use {
    super::{Gauge, Labels, MetricsBackend},
    crate::config::MetricsConfig,
    crate::lifecycle::{Component, Lifecycle},
    crate::Result,
    async_trait::async_trait,
    parking_lot::Mutex,
    std::sync::Arc,
    std::time::{Duration, Instant},
    tokio::task::JoinHandle,
};

struct HeavySample {
    taken_at: Instant,
    cpu_seconds: f64,
}

struct Gauges {
    uptime_seconds: Arc<dyn Gauge>,
    resident_memory_bytes: Arc<dyn Gauge>,
    cpu_usage_percent: Arc<dyn Gauge>,
    threads: Arc<dyn Gauge>,
    cpu_count: Arc<dyn Gauge>,
}

/// Background collector publishing process gauges through a backend.
pub struct SystemCollector {
    lifecycle: Lifecycle,
    backend: Arc<dyn MetricsBackend>,
    config: MetricsConfig,
    started_at: Instant,
    last_heavy: Arc<Mutex<Option<HeavySample>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SystemCollector {
    /// Creates a collector over the given backend.
    pub fn new(backend: Arc<dyn MetricsBackend>, config: MetricsConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new("system-metrics"),
            backend,
            config,
            started_at: Instant::now(),
            last_heavy: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    fn gauges(&self) -> Gauges {
        let labels = Labels::new();
        Gauges {
            uptime_seconds: self.backend.gauge("process_uptime_seconds", &labels),
            resident_memory_bytes: self.backend.gauge("process_resident_memory_bytes", &labels),
            cpu_usage_percent: self.backend.gauge("process_cpu_usage_percent", &labels),
            threads: self.backend.gauge("process_threads", &labels),
            cpu_count: self.backend.gauge("process_cpu_count", &labels),
        }
    }
}

fn light_pass(gauges: &Gauges, started_at: Instant) {
    gauges
        .uptime_seconds
        .set(started_at.elapsed().as_secs_f64());
    gauges.cpu_count.set(num_cpus::get() as f64);
}

fn heavy_pass(gauges: &Gauges, cache: &Mutex<Option<HeavySample>>, min_interval: Duration) {
    let now = Instant::now();
    {
        // Guard against oversampling when ticks bunch up after a stall.
        let cached = cache.lock();
        if let Some(sample) = cached.as_ref()
            && now.duration_since(sample.taken_at) < min_interval / 2
        {
            return;
        }
    }

    let cpu_seconds = proc_stat::cpu_seconds().unwrap_or(0.0);
    let resident_bytes = proc_stat::resident_bytes().unwrap_or(0);
    let threads = proc_stat::thread_count().unwrap_or(0);

    let mut cached = cache.lock();
    if let Some(previous) = cached.as_ref() {
        let elapsed = now.duration_since(previous.taken_at).as_secs_f64();
        if elapsed > 0.0 {
            let cpu_delta = (cpu_seconds - previous.cpu_seconds).max(0.0);
            let usage = (cpu_delta / elapsed / num_cpus::get() as f64) * 100.0;
            gauges.cpu_usage_percent.set(usage.clamp(0.0, 100.0));
        }
    }
    gauges.resident_memory_bytes.set(resident_bytes as f64);
    gauges.threads.set(threads as f64);

    *cached = Some(HeavySample {
        taken_at: now,
        cpu_seconds,
    });
}

#[async_trait]
impl Component for SystemCollector {
    fn name(&self) -> &str {
        "system-metrics"
    }

    async fn start(&self) -> Result<()> {
        let guard = self.lifecycle.begin_start()?;
        let cancel = self.lifecycle.cancellation_token();
        let gauges = self.gauges();
        let started_at = self.started_at;
        let cache = Arc::clone(&self.last_heavy);
        let heavy_interval = self.config.heavy_interval;
        let light_interval = self.config.light_interval;

        let task = tokio::spawn(async move {
            let mut heavy = tokio::time::interval(heavy_interval);
            let mut light = tokio::time::interval(light_interval);
            heavy.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            light.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = heavy.tick() => heavy_pass(&gauges, &cache, heavy_interval),
                    _ = light.tick() => light_pass(&gauges, started_at),
                }
            }
        });
        *self.task.lock() = Some(task);

        guard.complete();
        tracing::info!(
            heavy = ?self.config.heavy_interval,
            light = ?self.config.light_interval,
            "system collector started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.begin_stop()?;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::info!("system collector stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

/// Process accounting reads. Linux has first-class support through procfs;
/// elsewhere the readings come back as None and the gauges stay at zero.
mod proc_stat {
    #[cfg(target_os = "linux")]
    pub fn cpu_seconds() -> Option<f64> {
        let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
        // Fields 14 and 15 (1-based) are utime and stime in clock ticks;
        // the command field may contain spaces, so parse after the closing
        // parenthesis.
        let rest = stat.rsplit_once(')')?.1;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        let ticks_per_sec = 100.0; // USER_HZ on every mainstream Linux
        Some((utime + stime) as f64 / ticks_per_sec)
    }

    #[cfg(target_os = "linux")]
    pub fn resident_bytes() -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(resident_pages * 4096)
    }

    #[cfg(target_os = "linux")]
    pub fn thread_count() -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        status
            .lines()
            .find(|line| line.starts_with("Threads:"))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    }

    #[cfg(not(target_os = "linux"))]
    pub fn cpu_seconds() -> Option<f64> {
        None
    }

    #[cfg(not(target_os = "linux"))]
    pub fn resident_bytes() -> Option<u64> {
        None
    }

    #[cfg(not(target_os = "linux"))]
    pub fn thread_count() -> Option<u64> {
        None
    }
}
