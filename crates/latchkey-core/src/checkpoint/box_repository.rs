//! BoxCheckpointRepository -- object-safe dynamic dispatch wrapper for
//! [`CheckpointRepository`].
//!
//! 1. An object-safe `CheckpointRepositoryDyn` trait with boxed futures
//! 2. A blanket impl of it for all `T: CheckpointRepository`
//! 3. `BoxCheckpointRepository` wraps `Arc<dyn CheckpointRepositoryDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use latchkey_types::checkpoint::{Checkpoint, NewCheckpoint};
use latchkey_types::error::RepositoryError;

use super::repository::CheckpointRepository;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Object-safe version of [`CheckpointRepository`] with boxed futures.
pub trait CheckpointRepositoryDyn: Send + Sync {
    fn append_boxed<'a>(&'a self, checkpoint: &'a NewCheckpoint) -> BoxFuture<'a, Checkpoint>;

    fn get_latest_boxed<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Option<Checkpoint>>;

    fn list_thread_boxed<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Vec<Checkpoint>>;

    fn find_incomplete_boxed(
        &self,
        max_results: usize,
        created_after: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, Vec<Checkpoint>>;

    fn delete_thread_boxed<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, u64>;
}

impl<T: CheckpointRepository> CheckpointRepositoryDyn for T {
    fn append_boxed<'a>(&'a self, checkpoint: &'a NewCheckpoint) -> BoxFuture<'a, Checkpoint> {
        Box::pin(self.append(checkpoint))
    }

    fn get_latest_boxed<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Option<Checkpoint>> {
        Box::pin(self.get_latest(thread_id))
    }

    fn list_thread_boxed<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Vec<Checkpoint>> {
        Box::pin(self.list_thread(thread_id))
    }

    fn find_incomplete_boxed(
        &self,
        max_results: usize,
        created_after: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, Vec<Checkpoint>> {
        Box::pin(self.find_incomplete(max_results, created_after))
    }

    fn delete_thread_boxed<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, u64> {
        Box::pin(self.delete_thread(thread_id))
    }
}

/// Type-erased checkpoint repository, shareable across tasks.
///
/// Lets the checkpoint store stay non-generic while backends are chosen at
/// runtime (PostgreSQL in production, SQLite or in-memory elsewhere).
#[derive(Clone)]
pub struct BoxCheckpointRepository {
    inner: Arc<dyn CheckpointRepositoryDyn>,
}

impl BoxCheckpointRepository {
    pub fn new<T: CheckpointRepository + 'static>(repo: T) -> Self {
        Self {
            inner: Arc::new(repo),
        }
    }

    pub async fn append(&self, checkpoint: &NewCheckpoint) -> Result<Checkpoint, RepositoryError> {
        self.inner.append_boxed(checkpoint).await
    }

    pub async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, RepositoryError> {
        self.inner.get_latest_boxed(thread_id).await
    }

    pub async fn list_thread(&self, thread_id: &str) -> Result<Vec<Checkpoint>, RepositoryError> {
        self.inner.list_thread_boxed(thread_id).await
    }

    pub async fn find_incomplete(
        &self,
        max_results: usize,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Checkpoint>, RepositoryError> {
        self.inner.find_incomplete_boxed(max_results, created_after).await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> Result<u64, RepositoryError> {
        self.inner.delete_thread_boxed(thread_id).await
    }
}
