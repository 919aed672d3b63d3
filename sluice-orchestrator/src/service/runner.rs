//! Job Runner
//!
//! Executes one delivered task: fences it against the job and pipeline,
//! runs the worker, and applies the classified outcome. This is the only
//! place where a worker's result turns into a job status change or a new
//! task.

use sluice_core::domain::job::{ABORTED_BY_PIPELINE_FAILURE, JobStatus};
use sluice_core::domain::task::TaskMessage;
use sluice_core::graph::JobGraph;
use sluice_worker::context::UpstreamFailure;
use sluice_worker::{Outcome, WorkerContext};
use tracing::{debug, error, info, warn};

use crate::service::job::JobError;
use crate::service::pipeline;
use crate::state::AppState;

pub type Result<T> = std::result::Result<T, JobError>;

/// What became of a delivered task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDisposition {
    /// Stale or no longer meaningful; nothing was executed
    Discarded,
    /// The job reached a terminal status
    Completed,
    /// A retry or continuation was enqueued
    Rescheduled,
    /// Executed, but another delivery already moved the job on
    Duplicate,
}

impl TaskDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskDisposition::Discarded => "discarded",
            TaskDisposition::Completed => "completed",
            TaskDisposition::Rescheduled => "rescheduled",
            TaskDisposition::Duplicate => "duplicate",
        }
    }
}

/// Runs one `start-task` delivery
pub async fn run_task(state: &AppState, message: TaskMessage) -> Result<TaskDisposition> {
    let Some(job) = state.repos.jobs.find_by_id(message.job_id).await? else {
        debug!("Discarding task for unknown job {}", message.job_id);
        return Ok(TaskDisposition::Discarded);
    };

    if message.sequence != job.dispatch_seq {
        debug!(
            "Discarding stale task for job {} (sequence {}, current {})",
            job.id, message.sequence, job.dispatch_seq
        );
        return Ok(TaskDisposition::Discarded);
    }

    let Some(pipeline) = state.repos.pipelines.find_by_id(message.pipeline_id).await? else {
        debug!("Discarding task for unknown pipeline {}", message.pipeline_id);
        return Ok(TaskDisposition::Discarded);
    };

    if pipeline.run_id != Some(message.run_id) {
        debug!("Discarding task of a previous run of pipeline {}", pipeline.id);
        return Ok(TaskDisposition::Discarded);
    }

    if job.status != JobStatus::Running {
        debug!("Discarding task for job {} in status {}", job.id, job.status);
        return Ok(TaskDisposition::Discarded);
    }

    if !pipeline.status.is_active() {
        state
            .repos
            .jobs
            .complete(
                job.id,
                message.sequence,
                JobStatus::Failed,
                Some(ABORTED_BY_PIPELINE_FAILURE.to_string()),
            )
            .await?;
        debug!("Pipeline {} is {}, job {} aborted", pipeline.id, pipeline.status, job.id);
        return Ok(TaskDisposition::Discarded);
    }

    let upstream = upstream_failures(state, &message).await?;
    let ctx = WorkerContext::new(&message, upstream);

    let outcome = match state.workers.create(&message.worker_class, &message.params) {
        Ok(worker) => {
            debug!("Executing {} for job {} ({})", worker.name(), job.name, job.id);
            match tokio::time::timeout(state.settings.execution_timeout, worker.execute(&ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let message = format!(
                        "execution timed out after {}s",
                        state.settings.execution_timeout.as_secs()
                    );
                    ctx.log_warning(format!("Transient failure: {}", message));
                    Outcome::Transient(message)
                }
            }
        }
        Err(e) => {
            let message = e.to_string();
            ctx.log_error(format!("Failed: {}", message));
            Outcome::Fatal(message)
        }
    };

    let logs = ctx.drain_logs();
    if !logs.is_empty() {
        if let Err(e) = state.repos.logs.append(job.id, logs).await {
            warn!("Failed to persist logs for job {}: {}", job.id, e);
        }
    }

    apply_outcome(state, &message, outcome).await
}

async fn upstream_failures(state: &AppState, message: &TaskMessage) -> Result<Vec<UpstreamFailure>> {
    let jobs = state.repos.jobs.find_by_pipeline(message.pipeline_id).await?;
    let graph = JobGraph::new(&jobs);

    Ok(graph
        .upstream_failures(message.job_id)
        .into_iter()
        .filter_map(|id| jobs.iter().find(|j| j.id == id))
        .map(|j| UpstreamFailure {
            job_id: j.id,
            job_name: j.name.clone(),
            error: j.last_error.clone(),
        })
        .collect())
}

async fn apply_outcome(state: &AppState, message: &TaskMessage, outcome: Outcome) -> Result<TaskDisposition> {
    let job_id = message.job_id;

    match outcome {
        Outcome::Done => {
            if !state
                .repos
                .jobs
                .complete(job_id, message.sequence, JobStatus::Succeeded, None)
                .await?
            {
                debug!("Job {} already moved on, dropping success", job_id);
                return Ok(TaskDisposition::Duplicate);
            }
            info!("Job {} succeeded", job_id);
            finish(state, message).await
        }
        Outcome::Fatal(reason) => {
            if !state
                .repos
                .jobs
                .complete(job_id, message.sequence, JobStatus::Failed, Some(reason.clone()))
                .await?
            {
                return Ok(TaskDisposition::Duplicate);
            }
            error!("Job {} failed: {}", job_id, reason);
            finish(state, message).await
        }
        Outcome::Transient(reason) => {
            let Some(sequence) = state
                .repos
                .jobs
                .claim_dispatch(job_id, &[JobStatus::Running], message.sequence)
                .await?
            else {
                return Ok(TaskDisposition::Duplicate);
            };

            match state.repos.jobs.consume_retry(job_id, sequence).await? {
                Some(remaining) => {
                    let delay = state.settings.retry_delay(message.attempt);
                    warn!(
                        "Job {} failed transiently ({}), retrying in {}s ({} retries left)",
                        job_id,
                        reason,
                        delay.as_secs(),
                        remaining
                    );
                    if let Err(e) = state.dispatcher.dispatch_task(&message.retry(sequence), delay).await {
                        error!("Failed to enqueue retry for job {}: {}", job_id, e);
                        state
                            .repos
                            .jobs
                            .complete(
                                job_id,
                                sequence,
                                JobStatus::Failed,
                                Some(format!("failed to enqueue retry: {}", e)),
                            )
                            .await?;
                        return finish(state, message).await;
                    }
                    Ok(TaskDisposition::Rescheduled)
                }
                None => {
                    let reason = format!("retries exhausted: {}", reason);
                    if !state
                        .repos
                        .jobs
                        .complete(job_id, sequence, JobStatus::Failed, Some(reason.clone()))
                        .await?
                    {
                        return Ok(TaskDisposition::Duplicate);
                    }
                    error!("Job {} failed: {}", job_id, reason);
                    finish(state, message).await
                }
            }
        }
        Outcome::Continue(continuation) => {
            let Some(sequence) = state
                .repos
                .jobs
                .claim_dispatch(job_id, &[JobStatus::Running], message.sequence)
                .await?
            else {
                return Ok(TaskDisposition::Duplicate);
            };

            let next = message.continuation(
                sequence,
                continuation.worker_class,
                continuation.params,
                continuation.checkpoint,
            );
            if let Err(e) = state.dispatcher.dispatch_task(&next, continuation.delay).await {
                error!("Failed to enqueue continuation for job {}: {}", job_id, e);
                state
                    .repos
                    .jobs
                    .complete(
                        job_id,
                        sequence,
                        JobStatus::Failed,
                        Some(format!("failed to enqueue continuation: {}", e)),
                    )
                    .await?;
                return finish(state, message).await;
            }

            debug!(
                "Job {} continues as {} in {}s",
                job_id,
                next.worker_class,
                continuation.delay.as_secs()
            );
            Ok(TaskDisposition::Rescheduled)
        }
    }
}

async fn finish(state: &AppState, message: &TaskMessage) -> Result<TaskDisposition> {
    pipeline::on_job_finished(state, message.pipeline_id, message.job_id).await?;
    Ok(TaskDisposition::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EngineSettings;
    use crate::testing::{TestHarness, job, job_after, scripted, scripted_after, sleeper};
    use sluice_core::domain::job::RequiredOutcome;
    use sluice_core::domain::log::LogLevel;
    use sluice_core::domain::pipeline::PipelineStatus;
    use sluice_core::dto::pipeline::StartPipelineResponse;
    use std::time::Duration;

    #[tokio::test]
    async fn test_dependent_fatal_failure_fails_pipeline() {
        let harness = TestHarness::new();
        let details = harness
            .create(vec![
                job("a"),
                scripted_after("b", "a", RequiredOutcome::Succeeded, 0, "fatal"),
            ])
            .await;
        let id = details.pipeline.id;

        harness.start(id).await;
        harness.drain().await;

        let jobs = harness.jobs(id).await;
        assert_eq!(jobs[0].status, JobStatus::Succeeded);
        assert_eq!(jobs[1].status, JobStatus::Failed);

        let pipeline = harness.pipeline(id).await;
        assert_eq!(pipeline.status, PipelineStatus::Failed);
        assert_eq!(pipeline.failed_job_id, Some(jobs[1].id));
        assert_eq!(pipeline.last_error.as_deref(), Some("scripted fatal failure"));
    }

    #[tokio::test]
    async fn test_retry_budget_is_spent_before_failing() {
        let harness = TestHarness::new();
        let mut def = scripted("flaky", 3, "done");
        def.max_retries = 2;
        let details = harness.create(vec![def]).await;
        let id = details.pipeline.id;
        harness.start(id).await;

        // N + 1 = 3 transient failures
        for attempt in 1..=2 {
            assert_eq!(harness.deliver_next().await, Some(TaskDisposition::Rescheduled));
            let job = &harness.jobs(id).await[0];
            assert_eq!(job.status, JobStatus::Running, "attempt {}", attempt);
            assert_eq!(job.retries_left, 2 - attempt);
        }
        assert_eq!(harness.deliver_next().await, Some(TaskDisposition::Completed));

        let job = &harness.jobs(id).await[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(harness.attempts(job.id), 3);
        assert!(job.last_error.as_deref().unwrap().starts_with("retries exhausted"));
        assert_eq!(harness.pipeline(id).await.status, PipelineStatus::Failed);
    }

    #[tokio::test]
    async fn test_transient_failure_within_budget_recovers() {
        let harness = TestHarness::new();
        let mut def = scripted("flaky", 2, "done");
        def.max_retries = 2;
        let details = harness.create(vec![def]).await;
        harness.start(details.pipeline.id).await;
        harness.drain().await;

        assert_eq!(harness.jobs(details.pipeline.id).await[0].status, JobStatus::Succeeded);
        assert_eq!(harness.pipeline(details.pipeline.id).await.status, PipelineStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_redelivered_task_runs_step_once() {
        let harness = TestHarness::new();
        let details = harness.create(vec![scripted("a", 0, "done")]).await;
        let id = details.pipeline.id;
        harness.start(id).await;

        let task = harness.pending_tasks().remove(0);
        assert_eq!(run_task(&harness.state, task.clone()).await.unwrap(), TaskDisposition::Completed);
        assert_eq!(run_task(&harness.state, task).await.unwrap(), TaskDisposition::Discarded);

        let job = &harness.jobs(id).await[0];
        assert_eq!(harness.attempts(job.id), 1);
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_is_fenced() {
        let harness = TestHarness::new();
        let details = harness.create(vec![scripted("a", 0, "done")]).await;
        harness.start(details.pipeline.id).await;

        let task = harness.pending_tasks().remove(0);
        let (first, second) = tokio::join!(
            run_task(&harness.state, task.clone()),
            run_task(&harness.state, task)
        );
        let mut dispositions = vec![first.unwrap(), second.unwrap()];
        dispositions.sort_by_key(|d| *d as u8);

        assert_eq!(dispositions, vec![TaskDisposition::Completed, TaskDisposition::Duplicate]);
    }

    #[tokio::test]
    async fn test_task_from_previous_run_is_discarded() {
        let harness = TestHarness::new();
        let details = harness.create(vec![scripted("a", 0, "done")]).await;
        let id = details.pipeline.id;
        harness.start(id).await;
        let stale = harness.take_tasks().await.remove(0);

        crate::service::pipeline::reset_pipeline(&harness.state, id).await.unwrap();
        harness.start(id).await;

        assert_eq!(run_task(&harness.state, stale).await.unwrap(), TaskDisposition::Discarded);
        assert_eq!(harness.attempts(details.jobs[0].id), 0);
        assert_eq!(harness.jobs(id).await[0].status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_task_after_stop_is_discarded() {
        let harness = TestHarness::new();
        let details = harness.create(vec![scripted("a", 0, "done")]).await;
        let id = details.pipeline.id;
        harness.start(id).await;

        crate::service::pipeline::stop_pipeline(&harness.state, id).await.unwrap();
        assert_eq!(harness.deliver_next().await, Some(TaskDisposition::Discarded));
        assert_eq!(harness.attempts(details.jobs[0].id), 0);
    }

    #[tokio::test]
    async fn test_short_circuit_aborts_rest_of_pipeline() {
        let harness = TestHarness::new();
        let details = harness
            .create(vec![
                scripted("a", 0, "fatal"),
                job_after("b", "a", RequiredOutcome::Succeeded),
                job_after("c", "b", RequiredOutcome::Succeeded),
                scripted("d", 0, "continue"),
            ])
            .await;
        let id = details.pipeline.id;
        harness.start(id).await;

        // a fails while d is still running
        assert_eq!(harness.deliver_next().await, Some(TaskDisposition::Completed));

        let jobs = harness.jobs(id).await;
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[1].status, JobStatus::Failed);
        assert_eq!(jobs[1].last_error.as_deref(), Some("predecessor a failed"));
        assert_eq!(jobs[2].status, JobStatus::Failed);
        assert_eq!(jobs[3].status, JobStatus::Running);

        let pipeline = harness.pipeline(id).await;
        assert_eq!(pipeline.status, PipelineStatus::Failed);
        assert_eq!(pipeline.failed_job_id, Some(jobs[0].id));

        // the in-flight job is aborted when its task comes back
        assert_eq!(harness.deliver_next().await, Some(TaskDisposition::Discarded));
        let d = &harness.jobs(id).await[3];
        assert_eq!(d.status, JobStatus::Failed);
        assert_eq!(d.last_error.as_deref(), Some(ABORTED_BY_PIPELINE_FAILURE));
    }

    #[tokio::test]
    async fn test_handled_failure_runs_failure_branch() {
        let harness = TestHarness::new();
        let mut on_failure = job_after("notify", "load", RequiredOutcome::Failed);
        on_failure.start_conditions[0].pass_error = true;
        let details = harness
            .create(vec![
                scripted("load", 0, "fatal"),
                job_after("publish", "load", RequiredOutcome::Succeeded),
                on_failure,
            ])
            .await;
        let id = details.pipeline.id;
        harness.start(id).await;
        harness.drain().await;

        let jobs = harness.jobs(id).await;
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[1].status, JobStatus::Idle);
        assert_eq!(jobs[2].status, JobStatus::Succeeded);

        let logs = harness.state.repos.logs.find_by_job(jobs[2].id).await.unwrap();
        assert!(
            logs.iter()
                .any(|l| l.message == "Upstream job 'load' failed: scripted fatal failure")
        );

        let pipeline = harness.pipeline(id).await;
        assert_eq!(pipeline.status, PipelineStatus::Failed);
        assert_eq!(pipeline.failed_job_id, Some(jobs[0].id));
    }

    #[tokio::test]
    async fn test_success_skips_failure_branch() {
        let harness = TestHarness::new();
        let details = harness
            .create(vec![
                job("load"),
                job_after("publish", "load", RequiredOutcome::Succeeded),
                job_after("notify", "load", RequiredOutcome::Failed),
            ])
            .await;
        let id = details.pipeline.id;
        harness.start(id).await;
        harness.drain().await;

        let jobs = harness.jobs(id).await;
        assert_eq!(jobs[1].status, JobStatus::Succeeded);
        assert_eq!(jobs[2].status, JobStatus::Idle);
        assert_eq!(harness.pipeline(id).await.status, PipelineStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_worker_logs_are_persisted() {
        let harness = TestHarness::new();
        let details = harness.create(vec![job("a")]).await;
        harness.start(details.pipeline.id).await;
        harness.drain().await;

        let logs = harness.state.repos.logs.find_by_job(details.jobs[0].id).await.unwrap();
        let last = logs.last().unwrap();
        assert_eq!(last.level, LogLevel::Info);
        assert_eq!(last.message, "Finished successfully");
    }

    #[tokio::test]
    async fn test_unknown_worker_class_is_fatal() {
        let harness = TestHarness::new();
        let details = harness.create(vec![job("a")]).await;
        let id = details.pipeline.id;
        harness.start(id).await;

        let mut task = harness.take_tasks().await.remove(0);
        task.worker_class = "Retired".to_string();
        assert_eq!(run_task(&harness.state, task).await.unwrap(), TaskDisposition::Completed);

        let job = &harness.jobs(id).await[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("unknown worker class 'Retired'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_respawns_without_resubmitting() {
        let harness = TestHarness::new();
        let details = harness.create(vec![job_with_class("export", "SlowExport")]).await;
        let id = details.pipeline.id;
        let job_id = details.jobs[0].id;
        harness.start(id).await;

        assert_eq!(harness.deliver_next().await, Some(TaskDisposition::Rescheduled));

        let continuation = harness.pending_tasks().remove(0);
        assert_eq!(continuation.worker_class, "SlowExportWaiter");
        assert_eq!(continuation.sequence, 2);
        let checkpoint = continuation.checkpoint.clone().unwrap();
        assert_eq!(checkpoint.resource, "op-1");
        assert!(checkpoint.total_wait_secs > 0);

        let job = &harness.jobs(id).await[0];
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(harness.pipeline(id).await.status, PipelineStatus::Running);

        harness.drain().await;

        assert_eq!(harness.operation.submits(), 1);
        assert_eq!(harness.jobs(id).await[0].status, JobStatus::Succeeded);
        assert_eq!(harness.pipeline(id).await.status, PipelineStatus::Succeeded);

        let logs = harness.state.repos.logs.find_by_job(job_id).await.unwrap();
        assert!(logs.iter().any(|l| l.message == "Submitted operation op-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_after_submit_resumes_as_waiter() {
        let harness = TestHarness::new();
        let details = harness.create(vec![job_with_class("export", "SlowExport")]).await;
        let id = details.pipeline.id;
        harness.start(id).await;
        harness.operation.fail_next_polls(1);

        assert_eq!(harness.deliver_next().await, Some(TaskDisposition::Rescheduled));

        let continuation = harness.pending_tasks().remove(0);
        assert_eq!(continuation.worker_class, "SlowExportWaiter");
        assert_eq!(continuation.checkpoint.unwrap().resource, "op-1");

        harness.drain().await;

        assert_eq!(harness.operation.submits(), 1);
        let job = &harness.jobs(id).await[0];
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.retries_left, job.max_retries);
    }

    fn short_timeout() -> EngineSettings {
        EngineSettings {
            retry_base_delay: Duration::from_secs(30),
            retry_max_delay: Duration::from_secs(600),
            execution_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_timeout_spends_a_retry() {
        let harness = TestHarness::with_settings(short_timeout());
        let details = harness.create(vec![sleeper("slow", 60, 2)]).await;
        let id = details.pipeline.id;
        harness.start(id).await;

        assert_eq!(harness.deliver_next().await, Some(TaskDisposition::Rescheduled));

        let job = &harness.jobs(id).await[0];
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.retries_left, 1);
        assert_eq!(harness.pending_tasks()[0].attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_timeout_fails_once_retries_are_spent() {
        let harness = TestHarness::with_settings(short_timeout());
        let details = harness.create(vec![sleeper("slow", 60, 1)]).await;
        let id = details.pipeline.id;
        harness.start(id).await;

        assert_eq!(harness.deliver_next().await, Some(TaskDisposition::Rescheduled));
        assert_eq!(harness.deliver_next().await, Some(TaskDisposition::Completed));

        let job = &harness.jobs(id).await[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.last_error.as_deref(),
            Some("retries exhausted: execution timed out after 5s")
        );
        assert_eq!(harness.pipeline(id).await.status, PipelineStatus::Failed);
    }

    #[tokio::test]
    async fn test_restart_after_completion_starts_new_run() {
        let harness = TestHarness::new();
        let details = harness.create(vec![job("a")]).await;
        let id = details.pipeline.id;

        let first = harness.start(id).await;
        harness.drain().await;
        let second = harness.start(id).await;
        assert_ne!(first, second);

        let job = &harness.jobs(id).await[0];
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.dispatch_seq, 2);
        assert!(matches!(
            crate::service::pipeline::start_pipeline(&harness.state, id).await.unwrap(),
            StartPipelineResponse::Conflict { .. }
        ));
    }

    fn job_with_class(name: &str, class: &str) -> sluice_core::dto::pipeline::JobDefinition {
        let mut def = job(name);
        def.worker_class = class.to_string();
        def
    }
}
