//! Lock-protected workflow executor.
//!
//! Wraps any async step-function with lock acquisition and normalizes the
//! outcome. The executor knows nothing about the workflow engine behind the
//! closure; it only needs a callable and an identity string.
//!
//! # Contention
//!
//! What happens when the lock is held elsewhere is chosen once, at build
//! time, through [`ContentionPolicy`]:
//!
//! - `Raise`: `Err(DurabilityError::LockUnavailable)`
//! - `ReturnNone`: `Ok(None)`
//! - `ReturnStatus`: `Ok(Some(outcome))` with status `already_running`

use std::fmt::Display;
use std::future::Future;

use latchkey_types::config::ContentionPolicy;
use latchkey_types::error::DurabilityError;
use latchkey_types::outcome::WorkflowOutcome;

use crate::checkpoint::CheckpointStore;
use crate::lock::{AcquireMode, ExecutionContext, LockManager};
use crate::pool::SessionPool;

/// Builder for [`WorkflowExecutor`].
pub struct WorkflowExecutorBuilder<P: SessionPool> {
    manager: LockManager<P>,
    policy: ContentionPolicy,
    policy_name: Option<String>,
    mode: AcquireMode,
    store: Option<CheckpointStore>,
}

impl<P: SessionPool> WorkflowExecutorBuilder<P> {
    pub fn on_contention(mut self, policy: ContentionPolicy) -> Self {
        self.policy = policy;
        self.policy_name = None;
        self
    }

    /// Policy by name (`raise`, `return_none`, `return_status`), checked by `build`.
    pub fn on_contention_str(mut self, policy: impl Into<String>) -> Self {
        self.policy_name = Some(policy.into());
        self
    }

    /// Acquisition strategy. Non-blocking by default.
    pub fn mode(mut self, mode: AcquireMode) -> Self {
        self.mode = mode;
        self
    }

    /// Record the latest checkpoint ids around each run.
    pub fn checkpoints(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate and build. Fails on an unknown policy name or a closed manager.
    pub fn build(self) -> Result<WorkflowExecutor<P>, DurabilityError> {
        if self.manager.is_closed() {
            return Err(DurabilityError::ClosedManager);
        }
        let policy = match self.policy_name {
            Some(name) => name.parse::<ContentionPolicy>()?,
            None => self.policy,
        };
        Ok(WorkflowExecutor {
            manager: self.manager,
            policy,
            mode: self.mode,
            store: self.store,
        })
    }
}

/// Runs step-functions while holding their workflow lock.
pub struct WorkflowExecutor<P: SessionPool> {
    manager: LockManager<P>,
    policy: ContentionPolicy,
    mode: AcquireMode,
    store: Option<CheckpointStore>,
}

impl<P: SessionPool> Clone for WorkflowExecutor<P> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            policy: self.policy,
            mode: self.mode,
            store: self.store.clone(),
        }
    }
}

impl<P: SessionPool> WorkflowExecutor<P> {
    pub fn builder(manager: LockManager<P>) -> WorkflowExecutorBuilder<P> {
        WorkflowExecutorBuilder {
            manager,
            policy: ContentionPolicy::default(),
            policy_name: None,
            mode: AcquireMode::NonBlocking,
            store: None,
        }
    }

    pub fn policy(&self) -> ContentionPolicy {
        self.policy
    }

    /// Run `f` under the lock for `workflow_id`.
    ///
    /// The lock is released before this returns, on success and on error.
    /// An error from `f` is reported as [`DurabilityError::WorkflowFailed`].
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        workflow_id: &str,
        f: F,
    ) -> Result<Option<WorkflowOutcome<T>>, DurabilityError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let guard = self.manager.acquire(ctx, workflow_id, self.mode).await?;
        if !guard.is_acquired() {
            return self.contended(workflow_id);
        }

        let outcome = self.run_locked(workflow_id, f).await;
        guard.release().await;
        outcome.map(Some)
    }

    async fn run_locked<T, E, F, Fut>(
        &self,
        workflow_id: &str,
        f: F,
    ) -> Result<WorkflowOutcome<T>, DurabilityError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let before = match &self.store {
            Some(store) => store.get_latest(workflow_id).await?,
            None => None,
        };

        let output = f().await.map_err(|e| {
            tracing::error!(workflow_id, error = %e, "workflow failed");
            DurabilityError::WorkflowFailed {
                workflow_id: workflow_id.to_string(),
                message: e.to_string(),
            }
        })?;

        let after = match &self.store {
            Some(store) => store.get_latest(workflow_id).await?,
            None => None,
        };
        tracing::info!(workflow_id, "workflow completed successfully");

        let completed = after.as_ref().is_some_and(|c| c.is_terminal);
        Ok(WorkflowOutcome::success(workflow_id, output).with_checkpoints(
            before.map(|c| c.checkpoint_id),
            after.map(|c| c.checkpoint_id),
            completed,
        ))
    }

    fn contended<T>(&self, workflow_id: &str) -> Result<Option<WorkflowOutcome<T>>, DurabilityError> {
        match self.policy {
            ContentionPolicy::Raise => Err(DurabilityError::LockUnavailable(workflow_id.to_string())),
            ContentionPolicy::ReturnNone => Ok(None),
            ContentionPolicy::ReturnStatus => Ok(Some(WorkflowOutcome::already_running(workflow_id))),
        }
    }

    /// Fix the workflow identity, returning a reusable runner.
    pub fn bind(&self, workflow_id: impl Into<String>) -> Result<BoundWorkflow<P>, DurabilityError> {
        let workflow_id = workflow_id.into();
        if workflow_id.trim().is_empty() {
            return Err(DurabilityError::Configuration(
                "workflow_id must not be empty".to_string(),
            ));
        }
        Ok(BoundWorkflow {
            executor: self.clone(),
            workflow_id,
        })
    }
}

/// An executor bound to one workflow identity.
#[derive(Clone)]
pub struct BoundWorkflow<P: SessionPool> {
    executor: WorkflowExecutor<P>,
    workflow_id: String,
}

impl<P: SessionPool> BoundWorkflow<P> {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub async fn run<T, E, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        f: F,
    ) -> Result<Option<WorkflowOutcome<T>>, DurabilityError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.executor.execute(ctx, &self.workflow_id, f).await
    }
}
