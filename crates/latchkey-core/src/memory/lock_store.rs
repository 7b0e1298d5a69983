//! In-memory advisory lock store and session pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use latchkey_types::error::RepositoryError;
use latchkey_types::health::PoolMetrics;
use latchkey_types::lock::LockKey;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::pool::{LockSession, SessionPool};

#[derive(Debug, Clone, Copy)]
struct Ownership {
    session: u64,
    depth: u32,
}

struct Shared {
    owners: Mutex<HashMap<LockKey, Ownership>>,
    released: Notify,
    permits: Arc<Semaphore>,
    next_session: AtomicU64,
    in_use: AtomicU32,
    offline: AtomicBool,
}

impl Shared {
    fn owners(&self) -> MutexGuard<'_, HashMap<LockKey, Ownership>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<(), RepositoryError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RepositoryError::Connection)
        } else {
            Ok(())
        }
    }

    fn try_take(&self, session: u64, key: LockKey) -> Result<bool, RepositoryError> {
        self.check_online()?;
        let mut owners = self.owners();
        match owners.get_mut(&key) {
            None => {
                owners.insert(key, Ownership { session, depth: 1 });
                Ok(true)
            }
            Some(owner) if owner.session == session => {
                owner.depth += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    fn release_all(&self, session: u64) {
        let released = {
            let mut owners = self.owners();
            let before = owners.len();
            owners.retain(|_, owner| owner.session != session);
            before != owners.len()
        };
        if released {
            self.released.notify_waiters();
        }
    }
}

/// Shared in-memory lock table plus a bounded session pool.
///
/// Clones share the same table, so several managers built from clones
/// contend exactly as independent processes would against one database.
#[derive(Clone)]
pub struct MemoryLockStore {
    shared: Arc<Shared>,
    max_connections: u32,
}

impl MemoryLockStore {
    /// A store that hands out at most `max_connections` concurrent sessions.
    pub fn new(max_connections: u32) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            shared: Arc::new(Shared {
                owners: Mutex::new(HashMap::new()),
                released: Notify::new(),
                permits: Arc::new(Semaphore::new(max_connections as usize)),
                next_session: AtomicU64::new(1),
                in_use: AtomicU32::new(0),
                offline: AtomicBool::new(false),
            }),
            max_connections,
        }
    }

    /// Make every session operation fail with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    /// Forget every held lock, as a store does when it drops the sessions.
    ///
    /// Holders are not told; they only find out by asking the registry.
    pub fn drop_all_locks(&self) {
        self.shared.owners().clear();
        self.shared.released.notify_waiters();
    }

    /// Whether any session holds `key`.
    pub fn is_held(&self, key: LockKey) -> bool {
        self.shared.owners().contains_key(&key)
    }

    /// Number of keys held across all sessions.
    pub fn held_count(&self) -> usize {
        self.shared.owners().len()
    }

    /// Sessions currently checked out.
    pub fn sessions_in_use(&self) -> u32 {
        self.shared.in_use.load(Ordering::SeqCst)
    }
}

impl SessionPool for MemoryLockStore {
    type Session = MemorySession;

    async fn acquire(&self) -> Result<MemorySession, RepositoryError> {
        let permit = Arc::clone(&self.shared.permits)
            .acquire_owned()
            .await
            .map_err(|_| RepositoryError::Connection)?;
        self.shared.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            id: self.shared.next_session.fetch_add(1, Ordering::SeqCst),
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            min_connections: 0,
            max_connections: self.max_connections,
            size: self.sessions_in_use(),
            idle: 0,
        }
    }

    async fn close(&self) {
        self.shared.permits.close();
    }
}

/// One checked-out in-memory session. Dropping it releases its locks.
pub struct MemorySession {
    id: u64,
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession").field("id", &self.id).finish_non_exhaustive()
    }
}

impl LockSession for MemorySession {
    async fn try_lock(&mut self, key: LockKey) -> Result<bool, RepositoryError> {
        self.shared.try_take(self.id, key)
    }

    async fn lock(&mut self, key: LockKey) -> Result<(), RepositoryError> {
        loop {
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.try_take(self.id, key)? {
                return Ok(());
            }
            notified.await;
        }
    }

    async fn unlock(&mut self, key: LockKey) -> Result<bool, RepositoryError> {
        self.shared.check_online()?;
        let released = {
            let mut owners = self.shared.owners();
            match owners.get_mut(&key) {
                Some(owner) if owner.session == self.id => {
                    owner.depth -= 1;
                    if owner.depth == 0 {
                        owners.remove(&key);
                    }
                    true
                }
                _ => false,
            }
        };
        if released {
            self.shared.released.notify_waiters();
        }
        Ok(released)
    }

    async fn holds(&mut self, key: LockKey) -> Result<bool, RepositoryError> {
        self.shared.check_online()?;
        Ok(self
            .shared
            .owners()
            .get(&key)
            .is_some_and(|owner| owner.session == self.id))
    }

    async fn ping(&mut self) -> Result<(), RepositoryError> {
        self.shared.check_online()
    }

    fn discard(self) {
        drop(self);
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.shared.release_all(self.id);
        self.shared.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}
