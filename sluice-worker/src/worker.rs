//! Worker contract

use async_trait::async_trait;
use sluice_core::domain::task::Checkpoint;
use std::time::Duration;

use crate::context::WorkerContext;

/// Error raised from worker logic
///
/// `Fatal` is the explicit business-error signal and is never retried.
/// Anything else that bubbles up through `?` becomes `Transient`.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("{0}")]
    Fatal(String),
    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

impl WorkerError {
    pub fn fatal(message: impl Into<String>) -> Self {
        WorkerError::Fatal(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::Fatal(_))
    }
}

/// Follow-up step a worker asks the job runner to enqueue
#[derive(Debug, Clone, PartialEq)]
pub struct Continuation {
    pub worker_class: String,
    pub params: serde_json::Value,
    pub checkpoint: Option<Checkpoint>,
    pub delay: Duration,
}

/// What a single step of work produced
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The job's work is complete
    Done,
    /// The job continues in a later task
    Continue(Continuation),
}

/// Classified result of one execution
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    Continue(Continuation),
    Fatal(String),
    Transient(String),
}

/// A unit of work executed for one job step
///
/// Workers never touch pipeline or job status. They return a step and the
/// job runner applies the resulting transition.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Name the worker is registered under
    fn name(&self) -> &str;

    async fn do_work(&self, ctx: &WorkerContext) -> Result<Step, WorkerError>;

    /// Runs `do_work` and classifies its result
    async fn execute(&self, ctx: &WorkerContext) -> Outcome {
        match self.do_work(ctx).await {
            Ok(Step::Done) => {
                ctx.log_info("Finished successfully");
                Outcome::Done
            }
            Ok(Step::Continue(continuation)) => {
                ctx.log_info(format!(
                    "Continuing with {} in {}s",
                    continuation.worker_class,
                    continuation.delay.as_secs()
                ));
                Outcome::Continue(continuation)
            }
            Err(WorkerError::Fatal(message)) => {
                ctx.log_error(format!("Failed: {}", message));
                Outcome::Fatal(message)
            }
            Err(WorkerError::Transient(e)) => {
                let message = format!("{:#}", e);
                ctx.log_warning(format!("Transient failure: {}", message));
                Outcome::Transient(message)
            }
        }
    }
}
