//! Resume coordination for interrupted workflows.
//!
//! A thread needs resuming when its latest checkpoint is not terminal.
//! Resumption runs under a lock in its own namespace
//! ([`resume_lock_id`]), so at most one process resumes a given thread and
//! resuming never contends with the thread's primary execution lock.

use std::fmt::Display;
use std::future::Future;

use latchkey_types::checkpoint::Checkpoint;
use latchkey_types::config::{ContentionPolicy, ResumeConfig};
use latchkey_types::error::DurabilityError;
use latchkey_types::lock::resume_lock_id;
use latchkey_types::outcome::{WorkflowOutcome, WorkflowStatus};

use crate::checkpoint::CheckpointStore;
use crate::lock::{AcquireMode, ExecutionContext, LockManager};
use crate::pool::SessionPool;

/// Finds and resumes incomplete threads.
pub struct ResumeCoordinator<P: SessionPool> {
    manager: LockManager<P>,
    store: CheckpointStore,
    policy: ContentionPolicy,
    mode: AcquireMode,
}

impl<P: SessionPool> Clone for ResumeCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            store: self.store.clone(),
            policy: self.policy,
            mode: self.mode,
        }
    }
}

impl<P: SessionPool> ResumeCoordinator<P> {
    /// `config.on_contention` must be `raise` or `return_status`.
    pub fn new(
        manager: LockManager<P>,
        store: CheckpointStore,
        config: &ResumeConfig,
    ) -> Result<Self, DurabilityError> {
        config.validate()?;
        Ok(Self {
            manager,
            store,
            policy: config.on_contention,
            mode: AcquireMode::NonBlocking,
        })
    }

    /// Wait for a busy resume lock instead of reporting contention at once.
    pub fn with_mode(mut self, mode: AcquireMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Resume one thread with the configured acquisition mode.
    pub async fn resume<T, E, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        thread_id: &str,
        resume_fn: F,
    ) -> Result<WorkflowOutcome<T>, DurabilityError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.resume_with_mode(ctx, thread_id, resume_fn, self.mode).await
    }

    /// Resume one thread.
    ///
    /// 1. No checkpoint: `not_found` (or `NotFound` under `raise`).
    /// 2. Take the thread's resume lock; contention gives `already_running`
    ///    (or `LockUnavailable` under `raise`).
    /// 3. Call `resume_fn(thread_id)` under the lock.
    /// 4. Re-read the latest checkpoint for `after_checkpoint`/`completed`.
    ///
    /// A `resume_fn` error is returned as `ResumeFailure` once the lock is
    /// released.
    pub async fn resume_with_mode<T, E, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        thread_id: &str,
        resume_fn: F,
        mode: AcquireMode,
    ) -> Result<WorkflowOutcome<T>, DurabilityError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let Some(latest) = self.store.get_latest(thread_id).await? else {
            tracing::warn!(thread_id, "no checkpoint found, nothing to resume");
            return match self.policy {
                ContentionPolicy::Raise => Err(DurabilityError::NotFound(thread_id.to_string())),
                _ => Ok(WorkflowOutcome::not_found(thread_id)),
            };
        };

        let lock_id = resume_lock_id(thread_id);
        let guard = self.manager.acquire(ctx, &lock_id, mode).await?;
        if !guard.is_acquired() {
            tracing::warn!(thread_id, "thread is already being resumed elsewhere");
            return match self.policy {
                ContentionPolicy::Raise => Err(DurabilityError::LockUnavailable(lock_id)),
                _ => Ok(WorkflowOutcome::already_running(thread_id).with_checkpoints(
                    Some(latest.checkpoint_id),
                    None,
                    false,
                )),
            };
        }

        let result = self.run_locked(thread_id, resume_fn).await;
        guard.release().await;
        result
    }

    async fn run_locked<T, E, F, Fut>(
        &self,
        thread_id: &str,
        resume_fn: F,
    ) -> Result<WorkflowOutcome<T>, DurabilityError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        // Re-read under the lock: another process may have finished the
        // thread between the lookup and the acquisition.
        let before = self.store.require_latest(thread_id).await?;
        if before.is_terminal {
            tracing::info!(
                thread_id,
                checkpoint_id = before.checkpoint_id,
                "thread already complete, nothing to resume"
            );
            return Ok(already_complete(&before));
        }

        tracing::info!(
            thread_id,
            checkpoint_id = before.checkpoint_id,
            namespace = %before.namespace,
            "resuming thread from checkpoint"
        );
        let output = resume_fn(thread_id.to_string()).await.map_err(|e| {
            tracing::error!(thread_id, error = %e, "resume failed");
            DurabilityError::ResumeFailure {
                thread_id: thread_id.to_string(),
                message: e.to_string(),
            }
        })?;

        let after = self.store.get_latest(thread_id).await?;
        let completed = after.as_ref().is_some_and(|c| c.is_terminal);
        tracing::info!(thread_id, completed, "thread resumed");
        Ok(WorkflowOutcome::success(thread_id, output).with_checkpoints(
            Some(before.checkpoint_id),
            after.map(|c| c.checkpoint_id),
            completed,
        ))
    }

    /// Resume every incomplete thread, one at a time, without waiting on
    /// busy resume locks.
    ///
    /// Per-thread failures become `error` outcomes. Only a closed manager
    /// aborts the batch.
    pub async fn resume_all<T, E, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        resume_fn: F,
    ) -> Result<Vec<WorkflowOutcome<T>>, DurabilityError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let pending = self.store.list_incomplete().await?;
        tracing::info!(count = pending.len(), "resuming incomplete threads");

        let mut outcomes = Vec::with_capacity(pending.len());
        for descriptor in pending {
            let thread_id = descriptor.thread_id;
            match self
                .resume_with_mode(ctx, &thread_id, &resume_fn, AcquireMode::NonBlocking)
                .await
            {
                Ok(outcome) => outcomes.push(outcome),
                Err(DurabilityError::ClosedManager) => return Err(DurabilityError::ClosedManager),
                Err(e) => outcomes.push(WorkflowOutcome::error(thread_id, e.to_string())),
            }
        }
        Ok(outcomes)
    }
}

fn already_complete<T>(checkpoint: &Checkpoint) -> WorkflowOutcome<T> {
    WorkflowOutcome {
        status: WorkflowStatus::Success,
        thread_id: checkpoint.thread_id.clone(),
        before_checkpoint: Some(checkpoint.checkpoint_id),
        after_checkpoint: Some(checkpoint.checkpoint_id),
        completed: true,
        output: None,
        error: None,
    }
}
