//! Connection pool ports.
//!
//! Advisory locks are session-scoped: a lock belongs to the connection that
//! took it and disappears when that connection ends. The traits here model
//! exactly that. A [`LockSession`] is one checked-out connection, and a
//! [`SessionPool`] hands them out. Dropping a session returns it to the pool;
//! [`LockSession::discard`] closes it instead, which makes the store release
//! anything the session still held.

pub mod connection_pool;

pub use connection_pool::ConnectionPool;

use latchkey_types::error::RepositoryError;
use latchkey_types::health::PoolMetrics;
use latchkey_types::lock::LockKey;

/// One checked-out store connection with advisory-lock primitives.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait LockSession: Send + 'static {
    /// Try to take `key` without waiting. `Ok(false)` means held elsewhere.
    fn try_lock(
        &mut self,
        key: LockKey,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Wait until `key` is granted to this session.
    fn lock(
        &mut self,
        key: LockKey,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Release `key`. `Ok(false)` means this session did not hold it.
    fn unlock(
        &mut self,
        key: LockKey,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Ask the store's lock registry whether this session holds `key`.
    fn holds(
        &mut self,
        key: LockKey,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Minimal round-trip query.
    fn ping(&mut self) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Close the connection instead of returning it to the pool.
    fn discard(self);
}

/// A bounded pool of [`LockSession`]s.
pub trait SessionPool: Send + Sync + 'static {
    type Session: LockSession;

    /// Check out a session. May wait; callers bound the wait by dropping the future.
    fn acquire(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Session, RepositoryError>> + Send;

    /// Current size metrics.
    fn metrics(&self) -> PoolMetrics;

    /// Close every connection. Checked-out sessions close when dropped.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;
}
