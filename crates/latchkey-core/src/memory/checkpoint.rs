//! In-memory checkpoint repository.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use latchkey_types::checkpoint::{Checkpoint, NewCheckpoint};
use latchkey_types::error::RepositoryError;
use tokio::sync::RwLock;

use crate::checkpoint::CheckpointRepository;

#[derive(Default)]
struct Chains {
    threads: HashMap<String, Vec<(u64, Checkpoint)>>,
    next_seq: u64,
}

/// Checkpoint chains kept in a map. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryCheckpointRepository {
    chains: Arc<RwLock<Chains>>,
}

impl MemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift every checkpoint of a thread into the past.
    pub async fn backdate_thread(&self, thread_id: &str, by: chrono::Duration) {
        let mut chains = self.chains.write().await;
        if let Some(chain) = chains.threads.get_mut(thread_id) {
            for (_, checkpoint) in chain.iter_mut() {
                checkpoint.created_at -= by;
            }
        }
    }
}

impl CheckpointRepository for MemoryCheckpointRepository {
    async fn append(&self, new: &NewCheckpoint) -> Result<Checkpoint, RepositoryError> {
        let mut chains = self.chains.write().await;
        chains.next_seq += 1;
        let seq = chains.next_seq;
        let chain = chains.threads.entry(new.thread_id.clone()).or_default();
        let parent = chain.last().map(|(_, c)| c.checkpoint_id);
        let checkpoint = Checkpoint {
            thread_id: new.thread_id.clone(),
            checkpoint_id: parent.map_or(1, |id| id + 1),
            namespace: new.namespace.clone(),
            parent_checkpoint_id: parent,
            state: new.state.clone(),
            is_terminal: new.is_terminal,
            created_at: Utc::now(),
        };
        chain.push((seq, checkpoint.clone()));
        Ok(checkpoint)
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, RepositoryError> {
        let chains = self.chains.read().await;
        Ok(chains
            .threads
            .get(thread_id)
            .and_then(|chain| chain.last())
            .map(|(_, c)| c.clone()))
    }

    async fn list_thread(&self, thread_id: &str) -> Result<Vec<Checkpoint>, RepositoryError> {
        let chains = self.chains.read().await;
        Ok(chains
            .threads
            .get(thread_id)
            .map(|chain| chain.iter().map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn find_incomplete(
        &self,
        max_results: usize,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Checkpoint>, RepositoryError> {
        let chains = self.chains.read().await;
        let mut latest: Vec<&(u64, Checkpoint)> = chains
            .threads
            .values()
            .filter_map(|chain| chain.last())
            .filter(|(_, c)| !c.is_terminal)
            .filter(|(_, c)| created_after.is_none_or(|after| c.created_at >= after))
            .collect();
        latest.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        Ok(latest
            .into_iter()
            .take(max_results)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<u64, RepositoryError> {
        let mut chains = self.chains.write().await;
        Ok(chains
            .threads
            .remove(thread_id)
            .map_or(0, |chain| chain.len() as u64))
    }
}
