//! Advisory lock manager.
//!
//! Each acquired lock pins one pooled session for its whole lifetime, since
//! the store releases session-scoped advisory locks when the session ends.
//! The store's primitive is the source of truth for exclusion; the in-process
//! tables below only serve re-entrancy, diagnostics and cleanup.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use latchkey_types::config::LatchkeyConfig;
use latchkey_types::error::DurabilityError;
use latchkey_types::health::{HealthMetrics, HealthReport};
use latchkey_types::lock::LockKey;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::context::{ContextId, ExecutionContext};
use super::guard::LockGuard;
use crate::pool::{ConnectionPool, LockSession, SessionPool};
use crate::shutdown::{ShutdownCoordinator, ShutdownParticipant};

/// Shared cell holding the session that owns a lock.
///
/// Emptied exactly once, by whichever of release, force cleanup or drop
/// gets there first.
pub(crate) type SessionSlot<S> = Arc<tokio::sync::Mutex<Option<S>>>;

/// How long an acquisition may wait for a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// One immediate try.
    NonBlocking,
    /// Wait in the store until granted.
    Blocking,
    /// Poll until granted or the duration elapses. Zero means one try.
    Timeout(Duration),
}

impl AcquireMode {
    /// Map the `(blocking, timeout)` pair onto a mode. The timeout only
    /// applies to blocking acquisitions; a non-blocking one makes one try.
    pub fn from_flags(blocking: bool, timeout: Option<Duration>) -> Self {
        match (blocking, timeout) {
            (false, _) => AcquireMode::NonBlocking,
            (true, Some(timeout)) => AcquireMode::Timeout(timeout),
            (true, None) => AcquireMode::Blocking,
        }
    }
}

enum Attempt {
    Acquired,
    Unavailable,
    /// Stopped waiting because of shutdown or close.
    Abandoned,
}

struct ActiveLock<S> {
    workflow_id: String,
    context: ContextId,
    slot: SessionSlot<S>,
}

/// Returns the session to the pool on success paths and discards it if the
/// acquisition is dropped or fails midway.
struct SessionGuard<S: LockSession>(Option<S>);

impl<S: LockSession> SessionGuard<S> {
    fn get_mut(&mut self) -> Option<&mut S> {
        self.0.as_mut()
    }

    fn into_inner(mut self) -> Option<S> {
        self.0.take()
    }
}

impl<S: LockSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Some(session) = self.0.take() {
            session.discard();
        }
    }
}

pub(crate) struct ManagerInner<P: SessionPool> {
    pool: ConnectionPool<P>,
    poll_interval: Duration,
    close_wait: Duration,
    active: Mutex<HashMap<LockKey, ActiveLock<P::Session>>>,
    held: DashMap<ContextId, HashSet<LockKey>>,
    closed: AtomicBool,
    closing: tokio::sync::Mutex<()>,
    closed_signal: CancellationToken,
    shutdown: CancellationToken,
    registration: Mutex<Option<(ShutdownCoordinator, u64)>>,
}

impl<P: SessionPool> ManagerInner<P> {
    fn active_guard(&self) -> MutexGuard<'_, HashMap<LockKey, ActiveLock<P::Session>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_not_closed(&self) -> Result<(), DurabilityError> {
        if self.is_closed() {
            Err(DurabilityError::ClosedManager)
        } else {
            Ok(())
        }
    }

    fn holds_for(&self, context: ContextId, key: LockKey) -> bool {
        self.held
            .get(&context)
            .is_some_and(|keys| keys.contains(&key))
    }

    fn track(&self, context: ContextId, key: LockKey, workflow_id: &str, slot: SessionSlot<P::Session>) {
        self.active_guard().insert(
            key,
            ActiveLock {
                workflow_id: workflow_id.to_string(),
                context,
                slot,
            },
        );
        self.held.entry(context).or_default().insert(key);
    }

    /// Forget a lock. Only removes the entries created for `slot`, so a
    /// stale release can never untrack a later acquisition of the same key.
    pub(crate) fn untrack(&self, context: ContextId, key: LockKey, slot: &SessionSlot<P::Session>) {
        let removed = {
            let mut active = self.active_guard();
            match active.get(&key) {
                Some(entry) if Arc::ptr_eq(&entry.slot, slot) => active.remove(&key).is_some(),
                _ => false,
            }
        };
        if !removed {
            tracing::debug!(lock_key = %key, "lock was already untracked");
            return;
        }
        if let Some(mut keys) = self.held.get_mut(&context) {
            keys.remove(&key);
        }
        self.held.remove_if(&context, |_, keys| keys.is_empty());
    }

    pub(crate) async fn release(
        &self,
        context: ContextId,
        key: LockKey,
        workflow_id: &str,
        slot: &SessionSlot<P::Session>,
    ) {
        self.untrack(context, key, slot);
        self.unlock_slot(slot, key, workflow_id).await;
    }

    /// Unlock through the owning session and hand the session back.
    ///
    /// Returns whether the store confirmed the release.
    pub(crate) async fn unlock_slot(
        &self,
        slot: &SessionSlot<P::Session>,
        key: LockKey,
        workflow_id: &str,
    ) -> bool {
        let Some(mut session) = slot.lock().await.take() else {
            return false;
        };
        match session.unlock(key).await {
            Ok(true) => {
                tracing::info!(workflow_id, lock_key = %key, "released workflow lock");
                true
            }
            Ok(false) => {
                tracing::error!(
                    workflow_id,
                    lock_key = %key,
                    "unlock reported the lock was not held by this session"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    workflow_id,
                    lock_key = %key,
                    error = %e,
                    "failed to release workflow lock, closing its connection"
                );
                session.discard();
                false
            }
        }
    }

    async fn attempt(
        &self,
        session: &mut P::Session,
        key: LockKey,
        workflow_id: &str,
        mode: AcquireMode,
    ) -> Result<Attempt, DurabilityError> {
        match mode {
            AcquireMode::NonBlocking => Ok(if session.try_lock(key).await? {
                Attempt::Acquired
            } else {
                Attempt::Unavailable
            }),
            AcquireMode::Blocking => {
                tokio::select! {
                    locked = session.lock(key) => {
                        locked?;
                        Ok(Attempt::Acquired)
                    }
                    _ = self.shutdown.cancelled() => Ok(Attempt::Abandoned),
                    _ = self.closed_signal.cancelled() => Ok(Attempt::Abandoned),
                }
            }
            AcquireMode::Timeout(timeout) => {
                // Too far out to represent: poll until granted, shutdown or close.
                let deadline = Instant::now().checked_add(timeout);
                loop {
                    if session.try_lock(key).await? {
                        return Ok(Attempt::Acquired);
                    }
                    let now = Instant::now();
                    if deadline.is_some_and(|deadline| now >= deadline) {
                        return Ok(Attempt::Unavailable);
                    }
                    if self.shutdown.is_cancelled() || self.is_closed() {
                        return Ok(Attempt::Abandoned);
                    }
                    let pause = match deadline {
                        Some(deadline) => self.poll_interval.min(deadline - now),
                        None => self.poll_interval,
                    };
                    tracing::debug!(
                        workflow_id,
                        lock_key = %key,
                        pause_ms = pause.as_millis() as u64,
                        "workflow lock busy, polling"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = self.shutdown.cancelled() => return Ok(Attempt::Abandoned),
                        _ = self.closed_signal.cancelled() => return Ok(Attempt::Abandoned),
                    }
                }
            }
        }
    }

    /// Unlock and forget every tracked lock. Returns the number the store
    /// confirmed released.
    async fn release_all(&self) -> usize {
        let drained: Vec<(LockKey, ActiveLock<P::Session>)> = self.active_guard().drain().collect();
        self.held.clear();
        if drained.is_empty() {
            return 0;
        }
        tracing::warn!(count = drained.len(), "force-releasing active locks");
        let mut released = 0;
        for (key, entry) in drained {
            if self.unlock_slot(&entry.slot, key, &entry.workflow_id).await {
                released += 1;
            }
        }
        released
    }

    fn unregister(&self) {
        let registration = self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((coordinator, id)) = registration {
            coordinator.unregister(id);
        }
    }
}

impl<P: SessionPool> ShutdownParticipant for ManagerInner<P> {
    fn request_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!(active_locks = self.active_guard().len(), "shutdown requested");
        }
        self.shutdown.cancel();
    }

    fn active_lock_count(&self) -> usize {
        self.active_guard().len()
    }

    fn force_cleanup(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(self.release_all())
    }
}

impl<P: SessionPool> Drop for ManagerInner<P> {
    fn drop(&mut self) {
        self.unregister();
        if self.is_closed() {
            return;
        }
        let orphaned: Vec<ActiveLock<P::Session>> =
            self.active_guard().drain().map(|(_, entry)| entry).collect();
        if !orphaned.is_empty() {
            tracing::warn!(
                count = orphaned.len(),
                "lock manager dropped without close, discarding lock sessions"
            );
        }
        for entry in orphaned {
            if let Ok(mut held) = entry.slot.try_lock() {
                if let Some(session) = held.take() {
                    session.discard();
                }
            }
        }
    }
}

/// Acquires and releases named advisory locks.
///
/// Cheap to clone; clones share the same tables, pool and closed state.
pub struct LockManager<P: SessionPool> {
    inner: Arc<ManagerInner<P>>,
}

impl<P: SessionPool> Clone for LockManager<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: SessionPool> LockManager<P> {
    /// Create a manager over `pool`, registering with the process-wide
    /// shutdown coordinator when `shutdown.install_signal_handlers` is set.
    pub fn new(pool: P, config: &LatchkeyConfig) -> Result<Self, DurabilityError> {
        let coordinator = config
            .shutdown
            .install_signal_handlers
            .then(|| ShutdownCoordinator::global().clone());
        Self::with_coordinator(pool, config, coordinator)
    }

    /// Create a manager registered with `coordinator`, or with none.
    pub fn with_coordinator(
        pool: P,
        config: &LatchkeyConfig,
        coordinator: Option<ShutdownCoordinator>,
    ) -> Result<Self, DurabilityError> {
        config.lock.validate()?;
        config.shutdown.validate()?;
        let pool = ConnectionPool::new(pool, &config.pool)?;

        let inner = Arc::new(ManagerInner {
            pool,
            poll_interval: config.lock.poll_interval(),
            close_wait: config.lock.close_wait(),
            active: Mutex::new(HashMap::new()),
            held: DashMap::new(),
            closed: AtomicBool::new(false),
            closing: tokio::sync::Mutex::new(()),
            closed_signal: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            registration: Mutex::new(None),
        });

        if let Some(coordinator) = coordinator {
            coordinator.configure(&config.shutdown);
            let participant: Arc<dyn ShutdownParticipant> = inner.clone();
            let id = coordinator.register(Arc::downgrade(&participant));
            if config.shutdown.install_signal_handlers {
                coordinator.install_signal_handlers();
            }
            *inner
                .registration
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some((coordinator, id));
        }

        tracing::debug!(
            poll_interval_ms = config.lock.poll_interval_ms,
            max_connections = config.pool.max_connections,
            "lock manager created"
        );
        Ok(Self { inner })
    }

    /// Acquire the lock for `workflow_id`.
    ///
    /// Returns a guard whether or not the lock was granted; check
    /// [`LockGuard::is_acquired`]. A context that already holds the lock gets
    /// a re-entrant guard without a store round trip.
    pub async fn acquire(
        &self,
        ctx: &ExecutionContext,
        workflow_id: &str,
        mode: AcquireMode,
    ) -> Result<LockGuard<P>, DurabilityError> {
        validate_workflow_id(workflow_id)?;
        self.inner.check_not_closed()?;
        let key = LockKey::from_identifier(workflow_id);

        if self.inner.holds_for(ctx.id(), key) {
            tracing::warn!(
                workflow_id,
                lock_key = %key,
                context = %ctx.id(),
                "re-entrant acquisition, lock already held by this context"
            );
            return Ok(LockGuard::reentrant(workflow_id, key));
        }

        let mut session = SessionGuard(Some(self.inner.pool.acquire().await?));
        let attempt = match session.get_mut() {
            Some(s) => self.inner.attempt(s, key, workflow_id, mode).await?,
            None => Attempt::Unavailable,
        };

        match attempt {
            Attempt::Acquired => {
                let Some(mut owner) = session.into_inner() else {
                    return Err(DurabilityError::ClosedManager);
                };
                if self.inner.is_closed() {
                    if let Err(e) = owner.unlock(key).await {
                        tracing::error!(workflow_id, error = %e, "failed to unlock after close");
                        owner.discard();
                    }
                    return Err(DurabilityError::ClosedManager);
                }
                let slot: SessionSlot<P::Session> = Arc::new(tokio::sync::Mutex::new(Some(owner)));
                self.inner.track(ctx.id(), key, workflow_id, Arc::clone(&slot));
                tracing::info!(workflow_id, lock_key = %key, ?mode, "acquired workflow lock");
                Ok(LockGuard::owned(
                    Arc::clone(&self.inner),
                    ctx.id(),
                    workflow_id,
                    key,
                    slot,
                ))
            }
            Attempt::Unavailable => {
                drop(session.into_inner());
                tracing::warn!(
                    workflow_id,
                    lock_key = %key,
                    ?mode,
                    "workflow lock unavailable, another instance is running"
                );
                Ok(LockGuard::unavailable(workflow_id, key))
            }
            Attempt::Abandoned => {
                drop(session);
                tracing::warn!(workflow_id, lock_key = %key, "abandoned lock wait during shutdown");
                if self.inner.is_closed() {
                    return Err(DurabilityError::ClosedManager);
                }
                Ok(LockGuard::unavailable(workflow_id, key))
            }
        }
    }

    /// One immediate try.
    pub async fn try_acquire(
        &self,
        ctx: &ExecutionContext,
        workflow_id: &str,
    ) -> Result<LockGuard<P>, DurabilityError> {
        self.acquire(ctx, workflow_id, AcquireMode::NonBlocking).await
    }

    /// Ask the store whether this manager's session still holds the lock.
    ///
    /// Advisory locks vanish silently when their connection drops. Long
    /// running protected sections should call this periodically and stop
    /// when it returns `false`.
    pub async fn verify_still_held(&self, workflow_id: &str) -> Result<bool, DurabilityError> {
        validate_workflow_id(workflow_id)?;
        self.inner.check_not_closed()?;
        let key = LockKey::from_identifier(workflow_id);

        let slot = self
            .inner
            .active_guard()
            .get(&key)
            .map(|entry| Arc::clone(&entry.slot));
        let Some(slot) = slot else {
            tracing::warn!(workflow_id, lock_key = %key, "lock is not tracked by this manager");
            return Ok(false);
        };

        let mut held = slot.lock().await;
        let Some(session) = held.as_mut() else {
            return Ok(false);
        };
        match session.holds(key).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                tracing::error!(
                    workflow_id,
                    lock_key = %key,
                    "lock lost, connection may have been dropped"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!(workflow_id, lock_key = %key, error = %e, "failed to verify lock");
                Ok(false)
            }
        }
    }

    /// [`verify_still_held`](Self::verify_still_held) as a `Result`.
    pub async fn ensure_still_held(&self, workflow_id: &str) -> Result<(), DurabilityError> {
        if self.verify_still_held(workflow_id).await? {
            Ok(())
        } else {
            Err(DurabilityError::LockLost(workflow_id.to_string()))
        }
    }

    /// Whether some instance holds the lock right now.
    ///
    /// Diagnostic only: the answer can be stale before the caller reads it,
    /// so never use it to decide whether to run a workflow.
    pub async fn is_locked(&self, workflow_id: &str) -> Result<bool, DurabilityError> {
        validate_workflow_id(workflow_id)?;
        self.inner.check_not_closed()?;
        let key = LockKey::from_identifier(workflow_id);
        if self.inner.active_guard().contains_key(&key) {
            return Ok(true);
        }

        let mut session = SessionGuard(Some(self.inner.pool.acquire().await?));
        let Some(probe) = session.get_mut() else {
            return Ok(false);
        };
        if probe.try_lock(key).await? {
            probe.unlock(key).await?;
            drop(session.into_inner());
            Ok(false)
        } else {
            drop(session.into_inner());
            Ok(true)
        }
    }

    /// Locks currently held through this manager.
    pub fn active_lock_count(&self) -> usize {
        self.inner.active_guard().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Flag this manager for shutdown. Waiting acquisitions give up.
    pub fn request_shutdown(&self) {
        self.inner.request_shutdown();
    }

    /// Long-running protected sections should stop cooperatively once this is true.
    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Health of the manager and its pool.
    pub async fn health_check(&self) -> Result<HealthReport, DurabilityError> {
        self.inner.check_not_closed()?;
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        self.inner.pool.probe(&mut issues, &mut warnings).await;
        let shutdown_requested = self.is_shutdown_requested();
        if shutdown_requested {
            warnings.push("Shutdown has been requested".to_string());
        }
        let metrics = HealthMetrics {
            active_locks: self.active_lock_count(),
            acquire_timeout_ms: self.inner.pool.acquire_timeout().as_millis() as u64,
            shutdown_requested,
            closed: false,
            pool: self.inner.pool.metrics(),
        };
        Ok(HealthReport::from_findings(issues, warnings, metrics))
    }

    /// Quick probe: a connection can be checked out and answers a query.
    pub async fn validate_pool(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.inner.pool.acquire().await {
            Ok(mut session) => match session.ping().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "pool validation query failed");
                    session.discard();
                    false
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "pool validation could not get a connection");
                false
            }
        }
    }

    /// Unlock and forget every tracked lock.
    pub async fn force_cleanup(&self) -> usize {
        self.inner.release_all().await
    }

    /// Close the manager. Idempotent.
    ///
    /// Sets the closed flag first so concurrent acquisitions observe it,
    /// gives in-flight acquisitions a moment to notice, then releases
    /// everything still held and closes the pool.
    pub async fn close(&self) {
        let _closing = self.inner.closing.lock().await;
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("lock manager already closed");
            return;
        }
        self.inner.closed_signal.cancel();
        self.inner.unregister();
        tokio::time::sleep(self.inner.close_wait).await;
        let released = self.inner.release_all().await;
        self.inner.pool.close().await;
        tracing::info!(released, "lock manager closed");
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool<P> {
        &self.inner.pool
    }
}

fn validate_workflow_id(workflow_id: &str) -> Result<(), DurabilityError> {
    if workflow_id.trim().is_empty() {
        return Err(DurabilityError::Configuration(
            "workflow_id must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Instant as StdInstant;

    use latchkey_types::health::HealthStatus;

    use super::*;
    use crate::memory::MemoryLockStore;
    use crate::test_support::{manager, test_config};

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_non_blocking_exactly_one_wins() {
        let store = MemoryLockStore::new(8);
        let first = manager(&store);
        let second = manager(&store);

        let (c1, c2) = (ExecutionContext::new(), ExecutionContext::new());

        let (a, b) = tokio::join!(
            first.try_acquire(&c1, "daily_report"),
            second.try_acquire(&c2, "daily_report"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.is_acquired() ^ b.is_acquired());
        assert_eq!(first.active_lock_count() + second.active_lock_count(), 1);
    }

    #[tokio::test]
    async fn test_contexts_in_one_manager_exclude_each_other() {
        let store = MemoryLockStore::new(4);
        let manager = manager(&store);
        let held = manager.try_acquire(&ExecutionContext::new(), "w").await.unwrap();
        let other = manager.try_acquire(&ExecutionContext::new(), "w").await.unwrap();
        assert!(held.is_acquired());
        assert!(!other.is_acquired());
    }

    #[tokio::test]
    async fn test_repeated_cycles_leave_no_state() {
        let store = MemoryLockStore::new(2);
        let manager = manager(&store);
        let ctx = ExecutionContext::new();
        for _ in 0..50 {
            let guard = manager.try_acquire(&ctx, "cycle").await.unwrap();
            assert!(guard.is_acquired());
            assert_eq!(manager.active_lock_count(), 1);
            guard.release().await;
            assert_eq!(manager.active_lock_count(), 0);
            assert_eq!(store.held_count(), 0);
        }
        assert_eq!(store.sessions_in_use(), 0);
    }

    #[tokio::test]
    async fn test_reentrant_acquire_does_not_inflate_count() {
        let store = MemoryLockStore::new(1);
        let manager = manager(&store);
        let ctx = ExecutionContext::new();

        let outer = manager.try_acquire(&ctx, "w").await.unwrap();
        // The only connection is pinned by `outer`; a store round trip would time out.
        let inner = manager
            .acquire(&ctx, "w", AcquireMode::Blocking)
            .await
            .unwrap();
        assert!(inner.is_acquired());
        assert!(inner.is_reentrant());
        assert_eq!(manager.active_lock_count(), 1);

        inner.release().await;
        assert_eq!(manager.active_lock_count(), 1);
        assert!(store.is_held(LockKey::from_identifier("w")));

        outer.release().await;
        assert_eq!(manager.active_lock_count(), 0);
        assert!(!store.is_held(LockKey::from_identifier("w")));
    }

    #[tokio::test]
    async fn test_timeout_zero_returns_immediately() {
        let store = MemoryLockStore::new(4);
        let holder = manager(&store);
        let _held = holder.try_acquire(&ExecutionContext::new(), "w").await.unwrap();

        let contender = manager(&store);
        let started = StdInstant::now();
        let guard = contender
            .acquire(&ExecutionContext::new(), "w", AcquireMode::Timeout(Duration::ZERO))
            .await
            .unwrap();
        assert!(!guard.is_acquired());
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_timeout_waits_about_the_requested_duration() {
        let store = MemoryLockStore::new(4);
        let holder = manager(&store);
        let _held = holder.try_acquire(&ExecutionContext::new(), "w").await.unwrap();

        let contender = manager(&store);
        let started = StdInstant::now();
        let guard = contender
            .acquire(
                &ExecutionContext::new(),
                "w",
                AcquireMode::Timeout(Duration::from_millis(300)),
            )
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(!guard.is_acquired());
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(550), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_timeout_acquires_once_released() {
        let store = MemoryLockStore::new(4);
        let holder = manager(&store);
        let held = holder.try_acquire(&ExecutionContext::new(), "w").await.unwrap();

        let contender = manager(&store);
        let waiting = tokio::spawn(async move {
            let guard = contender
                .acquire(&ExecutionContext::new(), "w", AcquireMode::Timeout(Duration::from_secs(2)))
                .await
                .unwrap();
            guard.is_acquired()
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        held.release().await;
        assert!(waiting.await.unwrap());
    }

    #[tokio::test]
    async fn test_blocking_waits_for_release() {
        let store = MemoryLockStore::new(4);
        let holder = manager(&store);
        let held = holder.try_acquire(&ExecutionContext::new(), "w").await.unwrap();

        let contender = manager(&store);
        let waiting = tokio::spawn({
            let contender = contender.clone();
            async move {
                contender
                    .acquire(&ExecutionContext::new(), "w", AcquireMode::Blocking)
                    .await
                    .unwrap()
                    .is_acquired()
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());
        held.release().await;
        assert!(waiting.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_acquisition_leaks_nothing() {
        let store = MemoryLockStore::new(4);
        let holder = manager(&store);
        let held = holder.try_acquire(&ExecutionContext::new(), "w").await.unwrap();

        let contender = manager(&store);
        let ctx = ExecutionContext::new();
        let attempt = tokio::time::timeout(
            Duration::from_millis(50),
            contender.acquire(&ctx, "w", AcquireMode::Blocking),
        )
        .await;
        assert!(attempt.is_err());
        assert_eq!(store.sessions_in_use(), 1);

        held.release().await;
        assert_eq!(store.held_count(), 0);
        assert_eq!(contender.active_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_unlock_still_untracks() {
        let store = MemoryLockStore::new(2);
        let manager = manager(&store);
        let guard = manager.try_acquire(&ExecutionContext::new(), "w").await.unwrap();
        store.set_offline(true);
        guard.release().await;
        assert_eq!(manager.active_lock_count(), 0);

        // The failed session was closed, so the store dropped the lock.
        store.set_offline(false);
        assert_eq!(store.held_count(), 0);
        assert!(manager.try_acquire(&ExecutionContext::new(), "w").await.unwrap().is_acquired());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases() {
        let store = MemoryLockStore::new(2);
        let manager = manager(&store);
        {
            let guard = manager.try_acquire(&ExecutionContext::new(), "w").await.unwrap();
            assert!(guard.is_acquired());
        }
        assert_eq!(manager.active_lock_count(), 0);
        assert!(wait_until(|| store.held_count() == 0).await);
    }

    #[tokio::test]
    async fn test_release_on_error_path() {
        async fn protected(manager: &LockManager<MemoryLockStore>) -> Result<(), DurabilityError> {
            let _guard = manager.try_acquire(&ExecutionContext::new(), "w").await?;
            Err(DurabilityError::Configuration("boom".into()))
        }

        let store = MemoryLockStore::new(2);
        let manager = manager(&store);
        assert!(protected(&manager).await.is_err());
        assert_eq!(manager.active_lock_count(), 0);
        assert!(wait_until(|| store.held_count() == 0).await);
    }

    #[tokio::test]
    async fn test_verify_detects_phantom_unlock() {
        let store = MemoryLockStore::new(2);
        let manager = manager(&store);
        let _guard = manager.try_acquire(&ExecutionContext::new(), "w").await.unwrap();
        assert!(manager.verify_still_held("w").await.unwrap());
        assert!(manager.ensure_still_held("w").await.is_ok());

        store.drop_all_locks();
        assert!(!manager.verify_still_held("w").await.unwrap());
        assert!(matches!(
            manager.ensure_still_held("w").await,
            Err(DurabilityError::LockLost(id)) if id == "w"
        ));
    }

    #[tokio::test]
    async fn test_verify_untracked_is_false() {
        let store = MemoryLockStore::new(2);
        assert!(!manager(&store).verify_still_held("never").await.unwrap());
    }

    #[tokio::test]
    async fn test_is_locked_is_a_probe_only() {
        let store = MemoryLockStore::new(4);
        let observer = manager(&store);
        assert!(!observer.is_locked("w").await.unwrap());
        assert_eq!(store.held_count(), 0);

        let holder = manager(&store);
        let _guard = holder.try_acquire(&ExecutionContext::new(), "w").await.unwrap();
        assert!(observer.is_locked("w").await.unwrap());
        assert!(holder.is_locked("w").await.unwrap());
        assert_eq!(observer.active_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_close_rejects_everything_after() {
        let store = MemoryLockStore::new(2);
        let manager = manager(&store);
        let ctx = ExecutionContext::new();
        let guard = manager.try_acquire(&ctx, "w").await.unwrap();
        assert!(guard.is_acquired());

        manager.close().await;
        assert!(manager.is_closed());
        assert_eq!(manager.active_lock_count(), 0);
        assert_eq!(store.held_count(), 0);

        assert!(matches!(
            manager.try_acquire(&ctx, "other").await,
            Err(DurabilityError::ClosedManager)
        ));
        assert!(matches!(manager.verify_still_held("w").await, Err(DurabilityError::ClosedManager)));
        assert!(matches!(manager.is_locked("w").await, Err(DurabilityError::ClosedManager)));
        assert!(matches!(manager.health_check().await, Err(DurabilityError::ClosedManager)));
        assert!(!manager.validate_pool().await);

        // Releasing a guard that close already cleaned up is harmless.
        guard.release().await;
        manager.close().await;
        assert!(manager.is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_acquisition() {
        let store = MemoryLockStore::new(4);
        let holder = manager(&store);
        let _held = holder.try_acquire(&ExecutionContext::new(), "w").await.unwrap();

        let closing = manager(&store);
        let waiting = tokio::spawn({
            let closing = closing.clone();
            async move {
                closing
                    .acquire(&ExecutionContext::new(), "w", AcquireMode::Blocking)
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        closing.close().await;
        let result = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(DurabilityError::ClosedManager)));
    }

    #[tokio::test]
    async fn test_shutdown_abandons_waits() {
        let store = MemoryLockStore::new(4);
        let holder = manager(&store);
        let _held = holder.try_acquire(&ExecutionContext::new(), "w").await.unwrap();

        let contender = manager(&store);
        let polling = tokio::spawn({
            let contender = contender.clone();
            async move {
                contender
                    .acquire(&ExecutionContext::new(), "w", AcquireMode::Timeout(Duration::from_secs(10)))
                    .await
                    .unwrap()
                    .is_acquired()
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        contender.request_shutdown();
        assert!(contender.is_shutdown_requested());

        let acquired = tokio::time::timeout(Duration::from_secs(1), polling)
            .await
            .unwrap()
            .unwrap();
        assert!(!acquired);
    }

    #[tokio::test]
    async fn test_simulated_termination_releases_all_managers() {
        let store = MemoryLockStore::new(8);
        let coordinator = ShutdownCoordinator::new(&test_config().shutdown);
        let config = test_config();
        let cooperative =
            LockManager::with_coordinator(store.clone(), &config, Some(coordinator.clone())).unwrap();
        let stubborn =
            LockManager::with_coordinator(store.clone(), &config, Some(coordinator.clone())).unwrap();

        // A protected section that stops once shutdown is requested.
        let worker = tokio::spawn({
            let manager = cooperative.clone();
            async move {
                let guard = manager.try_acquire(&ExecutionContext::new(), "a").await.unwrap();
                while !manager.is_shutdown_requested() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                guard.release().await;
            }
        });
        let _ignores_shutdown = stubborn.try_acquire(&ExecutionContext::new(), "b").await.unwrap();
        assert!(wait_until(|| store.held_count() == 2).await);

        let started = StdInstant::now();
        let report = coordinator.shutdown().await;
        worker.await.unwrap();

        assert_eq!(report.participants, 2);
        assert_eq!(report.forced_releases, 1);
        assert_eq!(cooperative.active_lock_count() + stubborn.active_lock_count(), 0);
        assert_eq!(store.held_count(), 0);
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_closed_manager_unregisters() {
        let store = MemoryLockStore::new(2);
        let coordinator = ShutdownCoordinator::new(&test_config().shutdown);
        let manager =
            LockManager::with_coordinator(store, &test_config(), Some(coordinator.clone())).unwrap();
        assert_eq!(coordinator.participant_count(), 1);
        manager.close().await;
        assert_eq!(coordinator.participant_count(), 0);
    }

    #[tokio::test]
    async fn test_health_check_levels() {
        let store = MemoryLockStore::new(4);
        let manager = manager(&store);
        let _guard = manager.try_acquire(&ExecutionContext::new(), "w").await.unwrap();

        let report = manager.health_check().await.unwrap();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.metrics.active_locks, 1);

        manager.request_shutdown();
        let report = manager.health_check().await.unwrap();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.metrics.shutdown_requested);

        store.set_offline(true);
        let report = manager.health_check().await.unwrap();
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_validate_pool() {
        let store = MemoryLockStore::new(2);
        let manager = manager(&store);
        assert!(manager.validate_pool().await);
        store.set_offline(true);
        assert!(!manager.validate_pool().await);
    }

    #[tokio::test]
    async fn test_force_cleanup_releases_everything() {
        let store = MemoryLockStore::new(4);
        let manager = manager(&store);
        let ctx = ExecutionContext::new();
        let _a = manager.try_acquire(&ctx, "a").await.unwrap();
        let _b = manager.try_acquire(&ctx, "b").await.unwrap();
        assert_eq!(manager.force_cleanup().await, 2);
        assert_eq!(manager.active_lock_count(), 0);
        assert_eq!(store.held_count(), 0);
        // Re-entrancy bookkeeping was cleared with the locks.
        assert!(!manager.try_acquire(&ctx, "a").await.unwrap().is_reentrant());
    }

    #[tokio::test]
    async fn test_empty_workflow_id_rejected() {
        let store = MemoryLockStore::new(1);
        let manager = manager(&store);
        assert!(matches!(
            manager.try_acquire(&ExecutionContext::new(), " ").await,
            Err(DurabilityError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_config_fails_at_construction() {
        let mut config = test_config();
        config.pool.min_connections = 5;
        config.pool.max_connections = 2;
        assert!(matches!(
            LockManager::with_coordinator(MemoryLockStore::new(2), &config, None),
            Err(DurabilityError::Configuration(_))
        ));
    }

    #[test]
    fn test_mode_from_flags() {
        assert_eq!(AcquireMode::from_flags(false, None), AcquireMode::NonBlocking);
        assert_eq!(AcquireMode::from_flags(true, None), AcquireMode::Blocking);
        assert_eq!(
            AcquireMode::from_flags(true, Some(Duration::from_secs(1))),
            AcquireMode::Timeout(Duration::from_secs(1))
        );
        assert_eq!(
            AcquireMode::from_flags(false, Some(Duration::from_secs(1))),
            AcquireMode::NonBlocking
        );
    }

    #[tokio::test]
    async fn test_stale_guard_keeps_later_reentrancy() {
        let store = MemoryLockStore::new(2);
        let manager = manager(&store);
        let ctx = ExecutionContext::new();

        let stale = manager.try_acquire(&ctx, "w").await.unwrap();
        assert_eq!(manager.force_cleanup().await, 1);
        let fresh = manager.try_acquire(&ctx, "w").await.unwrap();
        assert!(fresh.is_acquired());
        assert!(!fresh.is_reentrant());

        stale.release().await;
        assert_eq!(manager.active_lock_count(), 1);
        assert!(store.is_held(LockKey::from_identifier("w")));

        let again = manager
            .acquire(&ctx, "w", AcquireMode::Timeout(Duration::from_millis(200)))
            .await
            .unwrap();
        assert!(again.is_acquired());
        assert!(again.is_reentrant());

        again.release().await;
        fresh.release().await;
        assert_eq!(manager.active_lock_count(), 0);
        assert!(!store.is_held(LockKey::from_identifier("w")));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_still_acquires() {
        let store = MemoryLockStore::new(2);
        let manager = manager(&store);
        let guard = manager
            .acquire(&ExecutionContext::new(), "w", AcquireMode::Timeout(Duration::MAX))
            .await
            .unwrap();
        assert!(guard.is_acquired());
        guard.release().await;
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_abandoned_on_shutdown() {
        let store = MemoryLockStore::new(4);
        let holder = manager(&store);
        let _held = holder.try_acquire(&ExecutionContext::new(), "w").await.unwrap();

        let contender = manager(&store);
        let waiting = {
            let contender = contender.clone();
            tokio::spawn(async move {
                contender
                    .acquire(&ExecutionContext::new(), "w", AcquireMode::Timeout(Duration::MAX))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        contender.request_shutdown();

        let guard = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!guard.is_acquired());
    }
}
