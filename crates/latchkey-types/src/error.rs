use std::time::Duration;

use thiserror::Error;

/// Errors from repository operations (used by the port traits in latchkey-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("failed to read configuration: {0}")]
    Io(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by locking, execution and resume operations.
#[derive(Debug, Error)]
pub enum DurabilityError {
    /// Invalid pool bounds, empty identifiers, invalid policy.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No pooled connection became available in time.
    #[error("timed out after {0:?} waiting for a pooled connection")]
    ConnectionTimeout(Duration),

    /// The workflow lock is held elsewhere.
    #[error("workflow '{0}' is already running in another instance")]
    LockUnavailable(String),

    /// No checkpoint exists for a resume target.
    #[error("no checkpoint found for thread '{0}'")]
    NotFound(String),

    /// The caller-supplied resume function failed.
    #[error("resume of thread '{thread_id}' failed: {message}")]
    ResumeFailure { thread_id: String, message: String },

    /// Operation attempted after `close()`.
    #[error("lock manager has been closed and cannot be used")]
    ClosedManager,

    /// The store no longer reports the lock as held by our session.
    #[error("lock for '{0}' is no longer held; another instance may be running")]
    LockLost(String),

    /// A protected step-function returned an error. Raised after release.
    #[error("workflow '{workflow_id}' failed: {message}")]
    WorkflowFailed {
        workflow_id: String,
        message: String,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<ConfigError> for DurabilityError {
    fn from(err: ConfigError) -> Self {
        DurabilityError::Configuration(err.to_string())
    }
}
