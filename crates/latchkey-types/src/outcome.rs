//! Workflow outcomes returned from every execute/resume call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome class of an execute or resume call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Success,
    AlreadyRunning,
    NotFound,
    Error,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Success => write!(f, "success"),
            WorkflowStatus::AlreadyRunning => write!(f, "already_running"),
            WorkflowStatus::NotFound => write!(f, "not_found"),
            WorkflowStatus::Error => write!(f, "error"),
        }
    }
}

/// Structured result of a protected execution or a resume.
///
/// `output` carries the step-function's return value on success.
/// `before_checkpoint`/`after_checkpoint` are the latest checkpoint ids
/// observed around the call, when a checkpoint store is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutcome<T = Value> {
    pub status: WorkflowStatus,
    pub thread_id: String,
    pub before_checkpoint: Option<i64>,
    pub after_checkpoint: Option<i64>,
    pub completed: bool,
    pub output: Option<T>,
    pub error: Option<String>,
}

impl<T> WorkflowOutcome<T> {
    fn bare(status: WorkflowStatus, thread_id: impl Into<String>) -> Self {
        Self {
            status,
            thread_id: thread_id.into(),
            before_checkpoint: None,
            after_checkpoint: None,
            completed: false,
            output: None,
            error: None,
        }
    }

    pub fn success(thread_id: impl Into<String>, output: T) -> Self {
        Self {
            output: Some(output),
            ..Self::bare(WorkflowStatus::Success, thread_id)
        }
    }

    pub fn already_running(thread_id: impl Into<String>) -> Self {
        Self::bare(WorkflowStatus::AlreadyRunning, thread_id)
    }

    pub fn not_found(thread_id: impl Into<String>) -> Self {
        Self::bare(WorkflowStatus::NotFound, thread_id)
    }

    pub fn error(thread_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::bare(WorkflowStatus::Error, thread_id)
        }
    }

    /// Attach the checkpoint ids observed around the call.
    pub fn with_checkpoints(
        mut self,
        before: Option<i64>,
        after: Option<i64>,
        completed: bool,
    ) -> Self {
        self.before_checkpoint = before;
        self.after_checkpoint = after;
        self.completed = completed;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&WorkflowStatus::AlreadyRunning).unwrap();
        assert_eq!(json, "\"already_running\"");
        assert_eq!(WorkflowStatus::NotFound.to_string(), "not_found");
    }

    #[test]
    fn test_success_outcome_carries_output() {
        let outcome = WorkflowOutcome::success("wf", 7u32).with_checkpoints(Some(1), Some(3), true);
        assert!(outcome.is_success());
        assert_eq!(outcome.output, Some(7));
        assert_eq!(outcome.before_checkpoint, Some(1));
        assert_eq!(outcome.after_checkpoint, Some(3));
        assert!(outcome.completed);
    }

    #[test]
    fn test_error_outcome_has_message_and_no_output() {
        let outcome: WorkflowOutcome = WorkflowOutcome::error("wf", "boom");
        assert_eq!(outcome.status, WorkflowStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("boom"));
        assert!(outcome.output.is_none());
        assert!(!outcome.completed);
    }
}
