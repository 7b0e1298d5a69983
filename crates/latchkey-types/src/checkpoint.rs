//! Checkpoint domain types.
//!
//! Checkpoints for one thread form an append-only sequence ordered by
//! `checkpoint_id`. The latest checkpoint of a thread is authoritative for
//! resume. Completion is carried by the explicit `is_terminal` flag; the
//! namespace is free-form text and is never parsed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A persisted snapshot of workflow state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Thread (workflow execution) this checkpoint belongs to.
    pub thread_id: String,
    /// Per-thread sequence number, strictly increasing, assigned by the store.
    pub checkpoint_id: i64,
    /// Free-form namespace, typically the name of the step that produced it.
    pub namespace: String,
    /// The checkpoint this one was appended after, if any.
    pub parent_checkpoint_id: Option<i64>,
    /// Opaque serialized state.
    pub state: Value,
    /// Whether this checkpoint marks the thread as complete.
    pub is_terminal: bool,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// A thread whose latest checkpoint is this one needs resuming.
    pub fn needs_resume(&self) -> bool {
        !self.is_terminal
    }

    /// Lightweight summary without the state payload.
    pub fn descriptor(&self) -> CheckpointDescriptor {
        CheckpointDescriptor {
            thread_id: self.thread_id.clone(),
            checkpoint_id: self.checkpoint_id,
            namespace: self.namespace.clone(),
            is_terminal: self.is_terminal,
            created_at: self.created_at,
        }
    }
}

/// Input for appending a checkpoint. The store assigns id, parent and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCheckpoint {
    pub thread_id: String,
    pub namespace: String,
    pub state: Value,
    pub is_terminal: bool,
}

impl NewCheckpoint {
    /// An intermediate (non-terminal) checkpoint.
    pub fn step(thread_id: impl Into<String>, namespace: impl Into<String>, state: Value) -> Self {
        Self {
            thread_id: thread_id.into(),
            namespace: namespace.into(),
            state,
            is_terminal: false,
        }
    }

    /// A checkpoint that completes the thread.
    pub fn terminal(
        thread_id: impl Into<String>,
        namespace: impl Into<String>,
        state: Value,
    ) -> Self {
        Self {
            is_terminal: true,
            ..Self::step(thread_id, namespace, state)
        }
    }
}

/// Checkpoint summary used for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointDescriptor {
    pub thread_id: String,
    pub checkpoint_id: i64,
    pub namespace: String,
    pub is_terminal: bool,
    pub created_at: DateTime<Utc>,
}
