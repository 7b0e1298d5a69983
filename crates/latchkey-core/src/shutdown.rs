//! Process-wide shutdown coordination.
//!
//! Lock managers register a weak reference with a [`ShutdownCoordinator`],
//! so registration never keeps a manager alive. One task per process waits
//! for SIGINT/SIGTERM. On termination the coordinator flags every live
//! manager, waits up to the grace period for their active-lock counts to
//! drain, force-cleans whatever remains, and exits the process.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};

use latchkey_types::config::ShutdownConfig;
use serde::Serialize;

/// Something holding locks that must be drained on shutdown.
pub trait ShutdownParticipant: Send + Sync {
    /// Flag the participant so new and polling acquisitions stop.
    fn request_shutdown(&self);

    /// Locks currently held.
    fn active_lock_count(&self) -> usize;

    /// Release everything still held. Returns how many locks were released.
    fn force_cleanup(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>>;
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    grace_period: Duration,
    log_interval: Duration,
    poll_interval: Duration,
}

impl From<&ShutdownConfig> for Settings {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            grace_period: config.grace_period(),
            log_interval: config.log_interval(),
            poll_interval: config.poll_interval(),
        }
    }
}

type Participants = Vec<(u64, Weak<dyn ShutdownParticipant>)>;

struct CoordinatorInner {
    participants: Mutex<Participants>,
    next_id: AtomicU64,
    settings: Mutex<Settings>,
    signals_installed: AtomicBool,
}

/// Summary of one shutdown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Live participants at the time of the shutdown.
    pub participants: usize,
    /// Every lock drained before the grace period ended.
    pub drained_gracefully: bool,
    /// Locks still held when the grace period ended.
    pub remaining_after_grace: usize,
    /// Locks released by force cleanup.
    pub forced_releases: usize,
}

/// Registry of live lock managers plus the process signal subscription.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<CoordinatorInner>,
}

static GLOBAL: OnceLock<ShutdownCoordinator> = OnceLock::new();

impl ShutdownCoordinator {
    pub fn new(config: &ShutdownConfig) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                participants: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                settings: Mutex::new(Settings::from(config)),
                signals_installed: AtomicBool::new(false),
            }),
        }
    }

    /// The process-wide coordinator, created with default settings on first use.
    pub fn global() -> &'static ShutdownCoordinator {
        GLOBAL.get_or_init(|| ShutdownCoordinator::new(&ShutdownConfig::default()))
    }

    /// Replace the grace period and polling settings.
    pub fn configure(&self, config: &ShutdownConfig) {
        *self.settings_guard() = Settings::from(config);
    }

    fn settings_guard(&self) -> MutexGuard<'_, Settings> {
        self.inner.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn participants_guard(&self) -> MutexGuard<'_, Participants> {
        self.inner
            .participants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a participant. Dead entries are pruned on the way.
    pub fn register(&self, participant: Weak<dyn ShutdownParticipant>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut participants = self.participants_guard();
        participants.retain(|(_, weak)| weak.strong_count() > 0);
        participants.push((id, participant));
        tracing::debug!(registration = id, total = participants.len(), "registered shutdown participant");
        id
    }

    pub fn unregister(&self, id: u64) {
        let mut participants = self.participants_guard();
        participants.retain(|(existing, weak)| *existing != id && weak.strong_count() > 0);
        tracing::debug!(registration = id, total = participants.len(), "unregistered shutdown participant");
    }

    /// Participants still alive.
    pub fn participant_count(&self) -> usize {
        self.live().len()
    }

    fn live(&self) -> Vec<Arc<dyn ShutdownParticipant>> {
        self.participants_guard()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    /// Subscribe to SIGINT/SIGTERM once for this coordinator.
    ///
    /// Returns `true` when this call installed the handler. Needs a running
    /// tokio runtime; without one nothing is installed and a later call may
    /// try again.
    pub fn install_signal_handlers(&self) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime; termination signals are not handled");
            return false;
        };
        if self
            .inner
            .signals_installed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let coordinator = self.clone();
        handle.spawn(async move {
            termination_signal().await;
            tracing::warn!("termination signal received, cleaning up all lock managers");
            let report = coordinator.shutdown().await;
            tracing::info!(
                participants = report.participants,
                drained_gracefully = report.drained_gracefully,
                forced_releases = report.forced_releases,
                "shutdown complete"
            );
            std::process::exit(0);
        });
        tracing::debug!("termination signal handlers installed");
        true
    }

    /// Drain every registered participant.
    ///
    /// Broadcasts the shutdown flag, polls the aggregate lock count until it
    /// reaches zero or the grace period ends, then force-cleans the rest.
    pub async fn shutdown(&self) -> ShutdownReport {
        let settings = *self.settings_guard();
        let participants = self.live();
        for participant in &participants {
            participant.request_shutdown();
        }

        let total = || participants.iter().map(|p| p.active_lock_count()).sum::<usize>();
        let started = Instant::now();
        let mut last_log = started;
        let mut remaining = total();

        while remaining > 0 && started.elapsed() < settings.grace_period {
            if last_log.elapsed() >= settings.log_interval {
                let left = settings.grace_period.saturating_sub(started.elapsed());
                tracing::info!(
                    remaining_locks = remaining,
                    grace_left_secs = left.as_secs(),
                    "waiting for locks to release"
                );
                last_log = Instant::now();
            }
            let left = settings.grace_period.saturating_sub(started.elapsed());
            tokio::time::sleep(settings.poll_interval.min(left)).await;
            remaining = total();
        }

        let mut report = ShutdownReport {
            participants: participants.len(),
            drained_gracefully: remaining == 0,
            remaining_after_grace: remaining,
            forced_releases: 0,
        };

        if remaining == 0 {
            tracing::info!("all locks released gracefully");
        } else {
            tracing::warn!(
                remaining_locks = remaining,
                grace_period_secs = settings.grace_period.as_secs(),
                "grace period expired, forcing cleanup"
            );
            for participant in &participants {
                report.forced_releases += participant.force_cleanup().await;
            }
        }
        report
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
