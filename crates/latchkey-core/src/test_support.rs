//! Shared fixtures for unit tests.

use latchkey_types::config::LatchkeyConfig;

use crate::lock::LockManager;
use crate::memory::MemoryLockStore;

/// Fast polling, no signal handlers, a short pool timeout.
pub(crate) fn test_config() -> LatchkeyConfig {
    let mut config = LatchkeyConfig::default();
    config.pool.max_connections = 8;
    config.pool.acquire_timeout_secs = 2;
    config.lock.poll_interval_ms = 20;
    config.lock.close_wait_ms = 10;
    config.shutdown.grace_period_secs = 1;
    config.shutdown.log_interval_secs = 1;
    config.shutdown.poll_interval_ms = 10;
    config.shutdown.install_signal_handlers = false;
    config
}

/// A manager over `store` that is not registered for shutdown.
pub(crate) fn manager(store: &MemoryLockStore) -> LockManager<MemoryLockStore> {
    LockManager::with_coordinator(store.clone(), &test_config(), None)
        .expect("test config is valid")
}
