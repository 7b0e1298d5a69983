//! Checkpoint store: the read/write API used by executors and resume.
//!
//! Wraps a [`BoxCheckpointRepository`] with identifier validation, the
//! configured incomplete-listing limits, and the completion rules (a thread
//! needs resume when its latest checkpoint exists and is not terminal).

use chrono::Utc;
use latchkey_types::checkpoint::{Checkpoint, CheckpointDescriptor, NewCheckpoint};
use latchkey_types::config::ResumeConfig;
use latchkey_types::error::DurabilityError;
use serde_json::Value;

use super::box_repository::BoxCheckpointRepository;
use super::repository::CheckpointRepository;

/// Ordered per-thread checkpoint access.
///
/// Cheap to clone; clones share the same repository.
#[derive(Clone)]
pub struct CheckpointStore {
    repo: BoxCheckpointRepository,
    max_results: usize,
    max_age: Option<chrono::Duration>,
}

impl CheckpointStore {
    /// Create a store over `repo`, validating the listing limits once.
    pub fn new<R: CheckpointRepository + 'static>(
        repo: R,
        config: &ResumeConfig,
    ) -> Result<Self, DurabilityError> {
        Self::from_boxed(BoxCheckpointRepository::new(repo), config)
    }

    pub fn from_boxed(
        repo: BoxCheckpointRepository,
        config: &ResumeConfig,
    ) -> Result<Self, DurabilityError> {
        config.validate()?;
        Ok(Self {
            repo,
            max_results: config.max_results,
            max_age: config.max_age(),
        })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Append an intermediate checkpoint.
    pub async fn save(
        &self,
        thread_id: &str,
        namespace: &str,
        state: Value,
    ) -> Result<Checkpoint, DurabilityError> {
        self.append(NewCheckpoint::step(thread_id, namespace, state)).await
    }

    /// Append the checkpoint that marks `thread_id` complete.
    pub async fn save_terminal(
        &self,
        thread_id: &str,
        namespace: &str,
        state: Value,
    ) -> Result<Checkpoint, DurabilityError> {
        self.append(NewCheckpoint::terminal(thread_id, namespace, state)).await
    }

    async fn append(&self, checkpoint: NewCheckpoint) -> Result<Checkpoint, DurabilityError> {
        validate_thread_id(&checkpoint.thread_id)?;
        let stored = self.repo.append(&checkpoint).await?;
        tracing::debug!(
            thread_id = %stored.thread_id,
            checkpoint_id = stored.checkpoint_id,
            namespace = %stored.namespace,
            is_terminal = stored.is_terminal,
            "checkpoint saved"
        );
        Ok(stored)
    }

    /// Remove every checkpoint of a thread. Returns the number removed.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<u64, DurabilityError> {
        validate_thread_id(thread_id)?;
        let removed = self.repo.delete_thread(thread_id).await?;
        tracing::info!(thread_id, removed, "deleted checkpoint thread");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The authoritative (latest) checkpoint of a thread, if any.
    pub async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, DurabilityError> {
        validate_thread_id(thread_id)?;
        Ok(self.repo.get_latest(thread_id).await?)
    }

    /// Like [`get_latest`](Self::get_latest) but a missing thread is `NotFound`.
    pub async fn require_latest(&self, thread_id: &str) -> Result<Checkpoint, DurabilityError> {
        self.get_latest(thread_id)
            .await?
            .ok_or_else(|| DurabilityError::NotFound(thread_id.to_string()))
    }

    /// True when the thread has checkpoints and the latest is not terminal.
    pub async fn needs_resume(&self, thread_id: &str) -> Result<bool, DurabilityError> {
        Ok(self
            .get_latest(thread_id)
            .await?
            .is_some_and(|checkpoint| checkpoint.needs_resume()))
    }

    /// Latest checkpoints of incomplete threads, newest first.
    ///
    /// `max_results` is clamped to the configured maximum. Threads older
    /// than the configured age limit are skipped.
    pub async fn find_incomplete(
        &self,
        max_results: usize,
    ) -> Result<Vec<Checkpoint>, DurabilityError> {
        if max_results == 0 {
            return Err(DurabilityError::Configuration(
                "max_results must be >= 1".to_string(),
            ));
        }
        let limit = max_results.min(self.max_results);
        let created_after = self.max_age.map(|age| Utc::now() - age);
        let found = self.repo.find_incomplete(limit, created_after).await?;
        tracing::debug!(count = found.len(), limit, "found incomplete threads");
        Ok(found)
    }

    /// Descriptors of every incomplete thread, up to the configured maximum.
    pub async fn list_incomplete(&self) -> Result<Vec<CheckpointDescriptor>, DurabilityError> {
        Ok(self
            .find_incomplete(self.max_results)
            .await?
            .iter()
            .map(Checkpoint::descriptor)
            .collect())
    }

    /// The thread's full chain, oldest first.
    pub async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, DurabilityError> {
        validate_thread_id(thread_id)?;
        Ok(self.repo.list_thread(thread_id).await?)
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }
}

fn validate_thread_id(thread_id: &str) -> Result<(), DurabilityError> {
    if thread_id.trim().is_empty() {
        return Err(DurabilityError::Configuration(
            "thread_id must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCheckpointRepository;
    use serde_json::json;

    fn store() -> CheckpointStore {
        CheckpointStore::new(MemoryCheckpointRepository::new(), &ResumeConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_chain_is_strictly_increasing() {
        let store = store();
        let first = store.save("t1", "fetch", json!({"n": 1})).await.unwrap();
        let second = store.save("t1", "summarize", json!({"n": 2})).await.unwrap();
        let third = store.save_terminal("t1", "deliver", json!({"n": 3})).await.unwrap();

        assert_eq!(first.parent_checkpoint_id, None);
        assert!(second.checkpoint_id > first.checkpoint_id);
        assert_eq!(second.parent_checkpoint_id, Some(first.checkpoint_id));
        assert_eq!(third.parent_checkpoint_id, Some(second.checkpoint_id));

        let history = store.history("t1").await.unwrap();
        let ids: Vec<i64> = history.iter().map(|c| c.checkpoint_id).collect();
        assert_eq!(ids, vec![first.checkpoint_id, second.checkpoint_id, third.checkpoint_id]);
    }

    #[tokio::test]
    async fn test_needs_resume_follows_latest_checkpoint() {
        let store = store();
        assert!(!store.needs_resume("t1").await.unwrap());

        store.save("t1", "step_1", json!({})).await.unwrap();
        assert!(store.needs_resume("t1").await.unwrap());

        store.save_terminal("t1", "step_2", json!({})).await.unwrap();
        assert!(!store.needs_resume("t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_namespace_text_does_not_imply_completion() {
        let store = store();
        store.save("t1", "end", json!({})).await.unwrap();
        store.save("t2", "append_to_backend", json!({})).await.unwrap();
        assert!(store.needs_resume("t1").await.unwrap());
        assert!(store.needs_resume("t2").await.unwrap());
    }

    #[tokio::test]
    async fn test_find_incomplete_skips_terminal_threads() {
        let store = store();
        store.save("open-a", "s1", json!({})).await.unwrap();
        store.save("done", "s1", json!({})).await.unwrap();
        store.save_terminal("done", "s2", json!({})).await.unwrap();
        store.save("open-b", "s1", json!({})).await.unwrap();

        let found = store.find_incomplete(10).await.unwrap();
        let mut threads: Vec<&str> = found.iter().map(|c| c.thread_id.as_str()).collect();
        threads.sort_unstable();
        assert_eq!(threads, vec!["open-a", "open-b"]);

        let limited = store.find_incomplete(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].thread_id, "open-b");
    }

    #[tokio::test]
    async fn test_find_incomplete_rejects_zero_limit() {
        assert!(matches!(
            store().find_incomplete(0).await,
            Err(DurabilityError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_list_incomplete_returns_descriptors() {
        let store = store();
        let saved = store.save("t1", "fetch", json!({"big": "payload"})).await.unwrap();
        let listed = store.list_incomplete().await.unwrap();
        assert_eq!(listed, vec![saved.descriptor()]);
    }

    #[tokio::test]
    async fn test_require_latest_missing_thread() {
        assert!(matches!(
            store().require_latest("ghost").await,
            Err(DurabilityError::NotFound(id)) if id == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_empty_thread_id_rejected() {
        let store = store();
        assert!(store.save("  ", "s", json!({})).await.is_err());
        assert!(store.get_latest("").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let store = store();
        store.save("t1", "a", json!({})).await.unwrap();
        store.save("t1", "b", json!({})).await.unwrap();
        assert_eq!(store.delete_thread("t1").await.unwrap(), 2);
        assert!(store.get_latest("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_incomplete_honours_max_age() {
        let repo = MemoryCheckpointRepository::new();
        let store = CheckpointStore::new(repo.clone(), &ResumeConfig::default()).unwrap();
        store.save("fresh", "s1", json!({})).await.unwrap();
        store.save("stale", "s1", json!({})).await.unwrap();
        repo.backdate_thread("stale", chrono::Duration::hours(48)).await;

        let found = store.find_incomplete(10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].thread_id, "fresh");

        let unfiltered = CheckpointStore::new(
            repo,
            &ResumeConfig {
                max_age_hours: 0,
                ..ResumeConfig::default()
            },
        )
        .unwrap();
        assert_eq!(unfiltered.find_incomplete(10).await.unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_resume_config_rejected() {
        let config = ResumeConfig {
            max_results: 0,
            ..ResumeConfig::default()
        };
        assert!(CheckpointStore::new(MemoryCheckpointRepository::new(), &config).is_err());
    }
}
