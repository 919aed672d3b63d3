//! Starter/waiter pair for external asynchronous operations
//!
//! `LongRunningWorker` submits the operation and then waits on it locally.
//! When the wait hits the safety threshold it continues as the waiter
//! variant, which only ever resumes polling the carried handle. A crash or
//! redelivery of the waiter therefore never creates a second operation.

use async_trait::async_trait;
use sluice_core::domain::task::Checkpoint;
use std::sync::Arc;

use crate::context::WorkerContext;
use crate::long_poll::{PollResult, PollSchedule, wait_until_done};
use crate::worker::{Continuation, Step, Worker, WorkerError};

/// Observed state of an external operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Succeeded,
    Failed(String),
}

/// A slow job running in some third-party system
#[async_trait]
pub trait ExternalOperation: Send + Sync {
    /// Starts the operation and returns its handle
    async fn submit(&self, ctx: &WorkerContext) -> Result<String, WorkerError>;

    async fn status(&self, ctx: &WorkerContext, handle: &str) -> Result<OperationState, WorkerError>;
}

#[async_trait]
impl<T: ExternalOperation + ?Sized> ExternalOperation for Arc<T> {
    async fn submit(&self, ctx: &WorkerContext) -> Result<String, WorkerError> {
        (**self).submit(ctx).await
    }

    async fn status(&self, ctx: &WorkerContext, handle: &str) -> Result<OperationState, WorkerError> {
        (**self).status(ctx, handle).await
    }
}

async fn await_operation<O: ExternalOperation>(
    operation: &O,
    ctx: &WorkerContext,
    schedule: &PollSchedule,
    checkpoint: Checkpoint,
    waiter_class: &str,
) -> Result<Step, WorkerError> {
    let handle = checkpoint.resource.clone();
    let handle_ref = handle.as_str();
    let resume = checkpoint.clone();

    let result = wait_until_done(schedule, checkpoint, move || async move {
        let state = operation.status(ctx, handle_ref).await?;
        Ok::<_, WorkerError>(match state {
            OperationState::Pending => None,
            OperationState::Succeeded => Some(Ok(())),
            OperationState::Failed(message) => Some(Err(message)),
        })
    })
    .await;

    // The handle already exists, so a failed poll resumes as the waiter
    // instead of surfacing as a retry that would rerun the submit.
    let result = match result {
        Ok(result) => result,
        Err(WorkerError::Transient(e)) => {
            ctx.log_warning(format!(
                "Polling operation {} failed, re-polling in {}s: {:#}",
                handle,
                schedule.repoll_interval.as_secs(),
                e
            ));
            let mut checkpoint = resume;
            checkpoint.total_wait_secs += schedule.repoll_interval.as_secs();
            PollResult::Pending(checkpoint)
        }
        Err(fatal) => return Err(fatal),
    };

    match result {
        PollResult::Ready(Ok(())) => {
            ctx.log_info(format!("Operation {} succeeded", handle));
            Ok(Step::Done)
        }
        PollResult::Ready(Err(message)) => Err(WorkerError::Fatal(format!(
            "operation {} failed: {}",
            handle, message
        ))),
        PollResult::Pending(checkpoint) => {
            ctx.log_info(format!(
                "Operation {} still running after {}s, re-polling in {}s",
                handle,
                checkpoint.total_wait_secs,
                schedule.repoll_interval.as_secs()
            ));
            Ok(Step::Continue(Continuation {
                worker_class: waiter_class.to_string(),
                params: ctx.params.clone(),
                checkpoint: Some(checkpoint),
                delay: schedule.repoll_interval,
            }))
        }
    }
}

/// Submits an external operation and waits for it
pub struct LongRunningWorker<O> {
    name: String,
    waiter_class: String,
    operation: O,
    schedule: PollSchedule,
}

impl<O: ExternalOperation> LongRunningWorker<O> {
    pub fn new(
        name: impl Into<String>,
        waiter_class: impl Into<String>,
        operation: O,
        schedule: PollSchedule,
    ) -> Self {
        Self {
            name: name.into(),
            waiter_class: waiter_class.into(),
            operation,
            schedule,
        }
    }
}

#[async_trait]
impl<O: ExternalOperation> Worker for LongRunningWorker<O> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn do_work(&self, ctx: &WorkerContext) -> Result<Step, WorkerError> {
        // A continuation routed here by mistake must not start a second operation.
        if let Some(checkpoint) = ctx.checkpoint() {
            return await_operation(
                &self.operation,
                ctx,
                &self.schedule,
                checkpoint.clone(),
                &self.waiter_class,
            )
            .await;
        }

        let handle = self.operation.submit(ctx).await?;
        ctx.log_info(format!("Submitted operation {}", handle));
        await_operation(
            &self.operation,
            ctx,
            &self.schedule,
            Checkpoint::new(handle),
            &self.waiter_class,
        )
        .await
    }
}

/// Resumes waiting on an operation started by a `LongRunningWorker`
pub struct WaiterWorker<O> {
    name: String,
    operation: O,
    schedule: PollSchedule,
}

impl<O: ExternalOperation> WaiterWorker<O> {
    pub fn new(name: impl Into<String>, operation: O, schedule: PollSchedule) -> Self {
        Self {
            name: name.into(),
            operation,
            schedule,
        }
    }
}

#[async_trait]
impl<O: ExternalOperation> Worker for WaiterWorker<O> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn do_work(&self, ctx: &WorkerContext) -> Result<Step, WorkerError> {
        let checkpoint = ctx
            .checkpoint()
            .cloned()
            .ok_or_else(|| WorkerError::fatal("waiter started without an operation handle"))?;
        ctx.log_debug(format!("Resuming wait on {}", checkpoint.resource));
        await_operation(&self.operation, ctx, &self.schedule, checkpoint, &self.name).await
    }
}
