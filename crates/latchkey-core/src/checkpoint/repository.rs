//! Checkpoint repository trait definition.
//!
//! Defines the storage interface for per-thread checkpoint chains. The
//! infrastructure layer (latchkey-infra) implements this trait with
//! PostgreSQL and SQLite persistence; `crate::memory` provides an in-memory
//! implementation for tests.

use chrono::{DateTime, Utc};
use latchkey_types::checkpoint::{Checkpoint, NewCheckpoint};
use latchkey_types::error::RepositoryError;

/// Repository trait for checkpoint persistence.
///
/// Checkpoints form an append-only chain per thread. The store assigns
/// `checkpoint_id` as one past the thread's current latest id and records
/// that latest id as the parent, so a thread's chain is strictly increasing.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointRepository: Send + Sync {
    /// Append a checkpoint to its thread's chain and return the stored row.
    fn append(
        &self,
        checkpoint: &NewCheckpoint,
    ) -> impl std::future::Future<Output = Result<Checkpoint, RepositoryError>> + Send;

    /// The most recent checkpoint of a thread.
    fn get_latest(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// Every checkpoint of a thread, oldest first.
    fn list_thread(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;

    /// Latest checkpoint of every thread whose latest checkpoint is not
    /// terminal, newest first, at most `max_results` entries.
    ///
    /// When `created_after` is set, threads whose latest checkpoint is older
    /// are skipped.
    fn find_incomplete(
        &self,
        max_results: usize,
        created_after: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;

    /// Remove a thread's whole chain. Returns the number of rows removed.
    fn delete_thread(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
