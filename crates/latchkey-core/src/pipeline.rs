//! Minimal durable step driver.
//!
//! A [`StepPipeline`] is an ordered list of named async steps over a JSON
//! state. Each completed step is checkpointed under its own name; the last
//! step (or one that returns [`StepOutput::Finish`]) writes the terminal
//! checkpoint. Running a pipeline on a thread that already has checkpoints
//! continues after the last persisted step with the persisted state, so
//! completed steps never run twice.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use latchkey_types::error::DurabilityError;
use serde::Serialize;
use serde_json::Value;

use crate::checkpoint::CheckpointStore;

/// What a step hands to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// Persist the state and run the next step.
    Continue(Value),
    /// Persist the state as terminal and stop.
    Finish(Value),
}

impl StepOutput {
    pub fn next(state: Value) -> Self {
        StepOutput::Continue(state)
    }

    pub fn finish(state: Value) -> Self {
        StepOutput::Finish(state)
    }
}

type StepFuture<E> = Pin<Box<dyn Future<Output = Result<StepOutput, E>> + Send>>;
type StepFn<E> = dyn Fn(Value) -> StepFuture<E> + Send + Sync;

struct Step<E> {
    name: String,
    run: Arc<StepFn<E>>,
}

impl<E> Clone for Step<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

/// Result of [`StepPipeline::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRun {
    pub thread_id: String,
    pub final_state: Value,
    /// Names of the steps executed by this call, in order.
    pub steps_run: Vec<String>,
    /// Checkpoint this run continued after, if the thread had one.
    pub resumed_from: Option<i64>,
}

/// Ordered named steps with a checkpoint after each.
pub struct StepPipeline<E = String> {
    name: String,
    steps: Vec<Step<E>>,
}

impl<E> Clone for StepPipeline<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            steps: self.steps.clone(),
        }
    }
}

impl<E: Display + Send + 'static> StepPipeline<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step. Its name is the namespace of the checkpoint it writes.
    pub fn step<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutput, E>> + Send + 'static,
    {
        let run: Arc<StepFn<E>> = Arc::new(move |state| Box::pin(f(state)) as StepFuture<E>);
        self.steps.push(Step {
            name: name.into(),
            run,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    fn validate(&self) -> Result<(), DurabilityError> {
        if self.steps.is_empty() {
            return Err(DurabilityError::Configuration(format!(
                "pipeline '{}' has no steps",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(DurabilityError::Configuration(format!(
                    "pipeline '{}' has duplicate step '{}'",
                    self.name, step.name
                )));
            }
        }
        Ok(())
    }

    /// Run the pipeline for `thread_id`, continuing after its latest checkpoint.
    ///
    /// `initial` is only used when the thread has no checkpoints. A thread
    /// whose latest checkpoint is terminal runs nothing.
    pub async fn run(
        &self,
        store: &CheckpointStore,
        thread_id: &str,
        initial: Value,
    ) -> Result<PipelineRun, DurabilityError> {
        self.validate()?;

        let latest = store.get_latest(thread_id).await?;
        let resumed_from = latest.as_ref().map(|c| c.checkpoint_id);
        let (start, mut state) = match latest {
            None => (0, initial),
            Some(checkpoint) if checkpoint.is_terminal => {
                tracing::debug!(thread_id, pipeline = %self.name, "thread already complete");
                return Ok(PipelineRun {
                    thread_id: thread_id.to_string(),
                    final_state: checkpoint.state,
                    steps_run: Vec::new(),
                    resumed_from,
                });
            }
            Some(checkpoint) => {
                let position = self
                    .steps
                    .iter()
                    .position(|s| s.name == checkpoint.namespace)
                    .ok_or_else(|| {
                        DurabilityError::Configuration(format!(
                            "checkpoint namespace '{}' is not a step of pipeline '{}'",
                            checkpoint.namespace, self.name
                        ))
                    })?;
                tracing::info!(
                    thread_id,
                    pipeline = %self.name,
                    after_step = %checkpoint.namespace,
                    "continuing pipeline from checkpoint"
                );
                (position + 1, checkpoint.state)
            }
        };

        let mut steps_run = Vec::new();
        let last = self.steps.len() - 1;

        if start > last {
            // The final step ran but its checkpoint was not terminal.
            let name = &self.steps[last].name;
            store.save_terminal(thread_id, name, state.clone()).await?;
        }

        for (index, step) in self.steps.iter().enumerate().skip(start) {
            tracing::debug!(thread_id, step = %step.name, "running step");
            let output = (step.run)(state).await.map_err(|e| DurabilityError::WorkflowFailed {
                workflow_id: thread_id.to_string(),
                message: format!("step '{}' failed: {e}", step.name),
            })?;
            steps_run.push(step.name.clone());

            match output {
                StepOutput::Continue(next) if index < last => {
                    store.save(thread_id, &step.name, next.clone()).await?;
                    state = next;
                }
                StepOutput::Continue(next) | StepOutput::Finish(next) => {
                    store.save_terminal(thread_id, &step.name, next.clone()).await?;
                    state = next;
                    break;
                }
            }
        }

        Ok(PipelineRun {
            thread_id: thread_id.to_string(),
            final_state: state,
            steps_run,
            resumed_from,
        })
    }
}
