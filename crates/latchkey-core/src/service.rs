//! Durable workflow service.
//!
//! One entry point over a lock manager and a checkpoint store: protected
//! execution, resume, incomplete-thread listing and health. Generic over the
//! session pool so latchkey-core never depends on latchkey-infra.

use std::fmt::Display;
use std::future::Future;

use latchkey_types::checkpoint::CheckpointDescriptor;
use latchkey_types::config::{LatchkeyConfig, ThreadIdConfig};
use latchkey_types::error::DurabilityError;
use latchkey_types::health::HealthReport;
use latchkey_types::outcome::WorkflowOutcome;
use latchkey_types::thread::generate_thread_id;

use crate::checkpoint::CheckpointStore;
use crate::executor::WorkflowExecutor;
use crate::lock::{ExecutionContext, LockManager};
use crate::pool::SessionPool;
use crate::resume::ResumeCoordinator;

/// Service orchestrating protected execution and resume.
pub struct DurableWorkflows<P: SessionPool> {
    manager: LockManager<P>,
    store: CheckpointStore,
    executor: WorkflowExecutor<P>,
    resume: ResumeCoordinator<P>,
    thread_ids: ThreadIdConfig,
}

impl<P: SessionPool> DurableWorkflows<P> {
    /// Build the service, validating the execution and resume policies once.
    pub fn new(
        manager: LockManager<P>,
        store: CheckpointStore,
        config: &LatchkeyConfig,
    ) -> Result<Self, DurabilityError> {
        config.validate()?;
        let executor = WorkflowExecutor::builder(manager.clone())
            .on_contention(config.execution.on_contention)
            .checkpoints(store.clone())
            .build()?;
        let resume = ResumeCoordinator::new(manager.clone(), store.clone(), &config.resume)?;
        Ok(Self {
            manager,
            store,
            executor,
            resume,
            thread_ids: config.thread_id.clone(),
        })
    }

    /// Run `f` under the lock for `workflow_id`.
    ///
    /// `Ok(None)` only under the `return_none` contention policy.
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
        self.executor.execute(ctx, workflow_id, f).await
    }

    /// Resume `thread_id` from its latest checkpoint.
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
        self.resume.resume(ctx, thread_id, resume_fn).await
    }

    /// Resume every incomplete thread.
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
        self.resume.resume_all(ctx, resume_fn).await
    }

    pub async fn list_incomplete(&self) -> Result<Vec<CheckpointDescriptor>, DurabilityError> {
        self.store.list_incomplete().await
    }

    pub async fn needs_resume(&self, thread_id: &str) -> Result<bool, DurabilityError> {
        self.store.needs_resume(thread_id).await
    }

    pub async fn health_check(&self) -> Result<HealthReport, DurabilityError> {
        self.manager.health_check().await
    }

    /// A fresh thread id per the configured format.
    pub fn generate_thread_id(&self, service_name: Option<&str>) -> String {
        generate_thread_id(&self.thread_ids, service_name)
    }

    /// Close the underlying lock manager. Idempotent.
    pub async fn close(&self) {
        self.manager.close().await;
    }

    pub fn manager(&self) -> &LockManager<P> {
        &self.manager
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn executor(&self) -> &WorkflowExecutor<P> {
        &self.executor
    }
}

#[cfg(test)]
mod tests {
    use latchkey_types::health::HealthStatus;
    use latchkey_types::outcome::WorkflowStatus;
    use serde_json::json;

    use super::*;
    use crate::memory::{MemoryCheckpointRepository, MemoryLockStore};
    use crate::test_support::{manager, test_config};

    fn service(locks: &MemoryLockStore) -> DurableWorkflows<MemoryLockStore> {
        let config = test_config();
        let store = CheckpointStore::new(MemoryCheckpointRepository::new(), &config.resume).unwrap();
        DurableWorkflows::new(manager(locks), store, &config).unwrap()
    }

    #[tokio::test]
    async fn test_execute_then_resume_round() {
        let locks = MemoryLockStore::new(8);
        let service = service(&locks);
        let ctx = ExecutionContext::new();
        let thread_id = service.generate_thread_id(Some("digest"));
        assert!(thread_id.starts_with("digest-"));

        let store = service.store().clone();
        let tid = thread_id.clone();
        let outcome = service
            .execute(&ctx, &thread_id, || async move {
                store.save(&tid, "fetch", json!({"items": 2})).await?;
                Err::<(), _>(DurabilityError::Configuration("crashed".into()))
            })
            .await;
        assert!(matches!(outcome, Err(DurabilityError::WorkflowFailed { .. })));

        let incomplete = service.list_incomplete().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].thread_id, thread_id);
        assert!(service.needs_resume(&thread_id).await.unwrap());

        let store = service.store().clone();
        let resumed = service
            .resume(&ctx, &thread_id, |tid| async move {
                store.save_terminal(&tid, "deliver", json!({"sent": true})).await
            })
            .await
            .unwrap();
        assert!(resumed.completed);
        assert!(service.list_incomplete().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_contention_uses_configured_policy() {
        let locks = MemoryLockStore::new(8);
        let service = service(&locks);
        let _held = manager(&locks)
            .try_acquire(&ExecutionContext::new(), "job")
            .await
            .unwrap();
        let outcome = service
            .execute(&ExecutionContext::new(), "job", || async { Ok::<_, String>(()) })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.status, WorkflowStatus::AlreadyRunning);
    }

    #[tokio::test]
    async fn test_health_and_close() {
        let locks = MemoryLockStore::new(4);
        let service = service(&locks);
        assert_eq!(service.health_check().await.unwrap().status, HealthStatus::Healthy);

        service.close().await;
        service.close().await;
        assert!(matches!(service.health_check().await, Err(DurabilityError::ClosedManager)));
        assert!(matches!(
            service
                .execute(&ExecutionContext::new(), "job", || async { Ok::<_, String>(()) })
                .await,
            Err(DurabilityError::ClosedManager)
        ));
    }

    #[test]
    fn test_invalid_policy_config_rejected() {
        let locks = MemoryLockStore::new(1);
        let mut config = test_config();
        let store = CheckpointStore::new(MemoryCheckpointRepository::new(), &config.resume).unwrap();
        config.resume.on_contention = latchkey_types::config::ContentionPolicy::ReturnNone;
        assert!(DurableWorkflows::new(manager(&locks), store, &config).is_err());
    }
}
