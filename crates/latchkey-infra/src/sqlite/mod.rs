//! SQLite checkpoint storage for single-host deployments.
//!
//! SQLite has no advisory locks, so it only backs the checkpoint port; lock
//! managers still need PostgreSQL (or the in-memory store in tests).

pub mod checkpoint;
pub mod pool;

pub use checkpoint::SqliteCheckpointRepository;
pub use pool::SqliteStore;
