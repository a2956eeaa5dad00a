//! Per-component lifecycle state machine and coordinated shutdown.
//!
//! Every long-lived subsystem owns a [`Lifecycle`] and exposes
//! `start()`/`stop()`/`is_running()` through the [`Component`] trait. State
//! transitions go through atomic compare-exchange so concurrent callers can
//! never double-start or double-stop a component:
//!
//! ```text
//! Stopped ──start()──▶ Starting ──success──▶ Running
//!    ▲                     │                    │
//!    └──── start failed ◀──┘                    │
//!    ▲                                          │
//!    └──────── Stopping ◀──────── stop() ◀──────┘
//! ```
//!
//! A second `start()` while Running returns [`ErrorKind::AlreadyRunning`];
//! `stop()` while Stopped returns [`ErrorKind::NotRunning`]. Both are soft
//! errors logged at WARN by callers.
//!
//! Composite shutdown runs every component's `stop()` in a bounded parallel
//! group with a timeout (default 10s); a component that fails to drain is
//! logged and abandoned without affecting its peers.

use {
    crate::{Error, Result},
    async_trait::async_trait,
    parking_lot::Mutex,
    std::sync::Arc,
    std::sync::atomic::{AtomicU8, Ordering},
    std::time::Duration,
    tokio::task::JoinSet,
    tokio_util::sync::CancellationToken,
};

/// Default upper bound on a composite shutdown pass.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// The lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ComponentState {
    /// Not running. The initial and final state.
    Stopped = 0,
    /// `start()` is in progress.
    Starting = 1,
    /// Fully operational.
    Running = 2,
    /// `stop()` is in progress; the internal scope is being cancelled.
    Stopping = 3,
}

impl ComponentState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ComponentState::Starting,
            2 => ComponentState::Running,
            3 => ComponentState::Stopping,
            _ => ComponentState::Stopped,
        }
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentState::Stopped => write!(f, "stopped"),
            ComponentState::Starting => write!(f, "starting"),
            ComponentState::Running => write!(f, "running"),
            ComponentState::Stopping => write!(f, "stopping"),
        }
    }
}

/// A long-lived subsystem with an ordered start/stop contract.
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable component name used in logs and shutdown reporting.
    fn name(&self) -> &str;

    /// Transitions the component from Stopped to Running.
    async fn start(&self) -> Result<()>;

    /// Transitions the component from Running to Stopped, cancelling its
    /// internal scope and draining child tasks.
    async fn stop(&self) -> Result<()>;

    /// Returns `true` while the component is in the Running state.
    fn is_running(&self) -> bool;
}

/// Thread-safe lifecycle tracker with atomic state transitions.
///
/// Owned by each component. The embedded [`CancellationToken`] is the
/// component's cancellable scope: child tasks select on it, and `stop()`
/// cancels it before waiting for drains. A fresh token is installed on the
/// next start so a restarted component gets an uncancelled scope.
pub struct Lifecycle {
    name: String,
    state: AtomicU8,
    cancel: Mutex<CancellationToken>,
}

impl Lifecycle {
    /// Creates a lifecycle tracker in the Stopped state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(ComponentState::Stopped as u8),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Returns the component name this lifecycle belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state.
    pub fn state(&self) -> ComponentState {
        ComponentState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns `true` while the component is Running.
    pub fn is_running(&self) -> bool {
        self.state() == ComponentState::Running
    }

    /// Returns a clone of the current cancellation scope.
    ///
    /// Child tasks spawned by the component select on this token; it is
    /// cancelled when `stop()` begins.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// Attempts the Stopped → Starting transition.
    ///
    /// Returns a [`StartGuard`] on success. Call [`StartGuard::complete`]
    /// once startup work succeeded to reach Running; dropping the guard
    /// without completing rolls back to Stopped.
    pub fn begin_start(&self) -> Result<StartGuard<'_>> {
        self.state
            .compare_exchange(
                ComponentState::Stopped as u8,
                ComponentState::Starting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| Error::already_running(&self.name))?;

        // A restarted component needs a fresh, uncancelled scope.
        *self.cancel.lock() = CancellationToken::new();

        Ok(StartGuard {
            lifecycle: self,
            completed: false,
        })
    }

    /// Attempts the Running → Stopping transition.
    ///
    /// Cancels the component scope immediately so child tasks begin
    /// draining while the caller performs its own cleanup. The returned
    /// [`StopGuard`] transitions to Stopped when dropped.
    pub fn begin_stop(&self) -> Result<StopGuard<'_>> {
        self.state
            .compare_exchange(
                ComponentState::Running as u8,
                ComponentState::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| Error::not_running(&self.name))?;

        self.cancel.lock().cancel();

        Ok(StopGuard { lifecycle: self })
    }

    /// Returns an error unless the component is currently Running.
    ///
    /// Operations that require a live component call this first so the
    /// check and the operation observe one consistent state.
    pub fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::not_running(&self.name))
        }
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Guard for an in-progress start. See [`Lifecycle::begin_start`].
#[derive(Debug)]
pub struct StartGuard<'a> {
    lifecycle: &'a Lifecycle,
    completed: bool,
}

impl StartGuard<'_> {
    /// Marks startup as successful, moving the component to Running.
    pub fn complete(mut self) {
        self.completed = true;
        self.lifecycle
            .state
            .store(ComponentState::Running as u8, Ordering::SeqCst);
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            // Start failed; roll back so a later start can retry.
            self.lifecycle
                .state
                .store(ComponentState::Stopped as u8, Ordering::SeqCst);
        }
    }
}

/// Guard for an in-progress stop. See [`Lifecycle::begin_stop`].
#[derive(Debug)]
pub struct StopGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle
            .state
            .store(ComponentState::Stopped as u8, Ordering::SeqCst);
    }
}

/// Stops a set of components as a bounded parallel group.
///
/// Callers pass components in **reverse startup order**; all stops run
/// concurrently but the vector ordering documents intent and keeps logs
/// readable. Each stop races the shared `timeout`: components that fail to
/// drain in time are logged with their name and abandoned, never blocking
/// their peers. Soft lifecycle conflicts (a component that never started)
/// are logged at DEBUG and ignored.
pub async fn stop_all(components: Vec<Arc<dyn Component>>, timeout: Duration) {
    let mut tasks = JoinSet::new();

    for component in components {
        tasks.spawn(async move {
            let name = component.name().to_string();
            let outcome = tokio::time::timeout(timeout, component.stop()).await;
            (name, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, Ok(Ok(())))) => {
                tracing::debug!(component = %name, "component stopped");
            }
            Ok((name, Ok(Err(err)))) if err.is_lifecycle_conflict() => {
                tracing::debug!(component = %name, "component was not running");
            }
            Ok((name, Ok(Err(err)))) => {
                tracing::warn!(component = %name, error = %err, "component stop failed");
            }
            Ok((name, Err(_elapsed))) => {
                tracing::error!(
                    component = %name,
                    timeout = ?timeout,
                    "component failed to drain before the shutdown timeout"
                );
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "component stop task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_initial_state_is_stopped() {
        let lc = Lifecycle::new("test");
        assert_eq!(lc.state(), ComponentState::Stopped);
        assert!(!lc.is_running());
    }

    #[test]
    fn test_start_complete_reaches_running() {
        let lc = Lifecycle::new("test");
        let guard = lc.begin_start().unwrap();
        assert_eq!(lc.state(), ComponentState::Starting);
        guard.complete();
        assert_eq!(lc.state(), ComponentState::Running);
        assert!(lc.is_running());
    }

    #[test]
    fn test_start_failure_rolls_back() {
        let lc = Lifecycle::new("test");
        {
            let _guard = lc.begin_start().unwrap();
            // dropped without complete()
        }
        assert_eq!(lc.state(), ComponentState::Stopped);
        // A retry is possible after the rollback.
        lc.begin_start().unwrap().complete();
        assert!(lc.is_running());
    }

    #[test]
    fn test_double_start_is_soft_error() {
        let lc = Lifecycle::new("cache");
        lc.begin_start().unwrap().complete();

        let err = lc.begin_start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyRunning);
        assert!(err.is_lifecycle_conflict());
        // The running component is unaffected.
        assert!(lc.is_running());
    }

    #[test]
    fn test_stop_when_not_running_is_soft_error() {
        let lc = Lifecycle::new("cache");
        let err = lc.begin_stop().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRunning);
    }

    #[test]
    fn test_stop_cancels_scope_and_reaches_stopped() {
        let lc = Lifecycle::new("test");
        lc.begin_start().unwrap().complete();
        let token = lc.cancellation_token();
        assert!(!token.is_cancelled());

        {
            let _guard = lc.begin_stop().unwrap();
            assert_eq!(lc.state(), ComponentState::Stopping);
            assert!(token.is_cancelled());
        }
        assert_eq!(lc.state(), ComponentState::Stopped);
    }

    #[test]
    fn test_restart_gets_fresh_scope() {
        let lc = Lifecycle::new("test");
        lc.begin_start().unwrap().complete();
        let first = lc.cancellation_token();
        drop(lc.begin_stop().unwrap());
        assert!(first.is_cancelled());

        lc.begin_start().unwrap().complete();
        let second = lc.cancellation_token();
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_double_stop_is_soft_error() {
        let lc = Lifecycle::new("test");
        lc.begin_start().unwrap().complete();
        drop(lc.begin_stop().unwrap());

        let err = lc.begin_stop().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRunning);
    }

    #[test]
    fn test_ensure_running() {
        let lc = Lifecycle::new("router");
        assert!(lc.ensure_running().is_err());
        lc.begin_start().unwrap().complete();
        assert!(lc.ensure_running().is_ok());
    }

    #[test]
    fn test_concurrent_start_single_winner() {
        use std::sync::atomic::AtomicUsize;

        let lc = Arc::new(Lifecycle::new("race"));
        let wins = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let lc = Arc::clone(&lc);
                let wins = Arc::clone(&wins);
                scope.spawn(move || {
                    if let Ok(guard) = lc.begin_start() {
                        wins.fetch_add(1, Ordering::SeqCst);
                        guard.complete();
                    }
                });
            }
        });

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(lc.is_running());
    }

    struct SlowComponent {
        lifecycle: Lifecycle,
        drain: Duration,
    }

    #[async_trait]
    impl Component for SlowComponent {
        fn name(&self) -> &str {
            self.lifecycle.name()
        }

        async fn start(&self) -> Result<()> {
            let guard = self.lifecycle.begin_start()?;
            guard.complete();
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            let _guard = self.lifecycle.begin_stop()?;
            tokio::time::sleep(self.drain).await;
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.lifecycle.is_running()
        }
    }

    #[tokio::test]
    async fn test_stop_all_drains_fast_components() {
        let a = Arc::new(SlowComponent {
            lifecycle: Lifecycle::new("a"),
            drain: Duration::from_millis(5),
        });
        let b = Arc::new(SlowComponent {
            lifecycle: Lifecycle::new("b"),
            drain: Duration::from_millis(5),
        });
        a.start().await.unwrap();
        b.start().await.unwrap();

        stop_all(
            vec![b.clone() as Arc<dyn Component>, a.clone()],
            Duration::from_secs(1),
        )
        .await;

        assert!(!a.is_running());
        assert!(!b.is_running());
    }

    #[tokio::test]
    async fn test_stop_all_timeout_does_not_block_peers() {
        let slow = Arc::new(SlowComponent {
            lifecycle: Lifecycle::new("slow"),
            drain: Duration::from_secs(30),
        });
        let fast = Arc::new(SlowComponent {
            lifecycle: Lifecycle::new("fast"),
            drain: Duration::from_millis(1),
        });
        slow.start().await.unwrap();
        fast.start().await.unwrap();

        let started = std::time::Instant::now();
        stop_all(
            vec![slow.clone() as Arc<dyn Component>, fast.clone()],
            Duration::from_millis(50),
        )
        .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!fast.is_running());
    }

    #[tokio::test]
    async fn test_stop_all_tolerates_never_started() {
        let stopped = Arc::new(SlowComponent {
            lifecycle: Lifecycle::new("never-started"),
            drain: Duration::from_millis(1),
        });
        stop_all(
            vec![stopped as Arc<dyn Component>],
            Duration::from_millis(50),
        )
        .await;
    }
}
