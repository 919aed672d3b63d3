//! Pipeline Service
//!
//! Pipeline definitions and the pipeline engine. The engine never decides a
//! pipeline's status on its own: after every job transition it rebuilds the
//! job graph and syncs the pipeline to the aggregated status.

use chrono::Utc;
use sluice_core::domain::job::{ABORTED_BY_PIPELINE_FAILURE, Job, JobStatus, StartCondition};
use sluice_core::domain::pipeline::{Pipeline, PipelineStatus};
use sluice_core::domain::task::TaskMessage;
use sluice_core::dto::admin::ResetReport;
use sluice_core::dto::pipeline::{CreatePipeline, PipelineDetails, StartPipelineResponse};
use sluice_core::graph::{JobGraph, Readiness, validate_definitions};
use sluice_core::schedule;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::QueueError;
use crate::repository::RepositoryError;
use crate::state::AppState;

pub const STOPPED_BY_OPERATOR: &str = "stopped by operator";

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline {0} not found")]
    NotFound(Uuid),
    #[error("{0}")]
    Validation(String),
    #[error("pipeline {id} is {status}")]
    InvalidState { id: Uuid, status: PipelineStatus },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Create a new pipeline with its jobs
pub async fn create_pipeline(state: &AppState, req: CreatePipeline) -> Result<PipelineDetails> {
    validate_pipeline_request(state, &req)?;

    let now = Utc::now();
    let pipeline = Pipeline {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        status: PipelineStatus::Idle,
        schedule: req
            .schedule
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        run_id: None,
        failed_job_id: None,
        last_error: None,
        created_at: now,
        updated_at: now,
        started_at: None,
        finished_at: None,
    };

    let ids: HashMap<&str, Uuid> = req
        .jobs
        .iter()
        .map(|def| (def.name.as_str(), Uuid::new_v4()))
        .collect();
    let lookup = |name: &str| {
        ids.get(name)
            .copied()
            .ok_or_else(|| PipelineError::Validation(format!("unknown job '{}'", name)))
    };

    let mut jobs = Vec::with_capacity(req.jobs.len());
    for (position, def) in req.jobs.iter().enumerate() {
        let start_conditions = def
            .start_conditions
            .iter()
            .map(|c| {
                Ok(StartCondition {
                    preceding_job_id: lookup(&c.job)?,
                    outcome: c.outcome,
                    pass_error: c.pass_error,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        jobs.push(Job {
            id: lookup(&def.name)?,
            pipeline_id: pipeline.id,
            name: def.name.clone(),
            position: position as i32,
            status: JobStatus::Idle,
            worker_class: def.worker_class.clone(),
            params: def.params.clone(),
            start_conditions,
            max_retries: def.max_retries,
            retries_left: def.max_retries,
            dispatch_seq: 0,
            last_error: None,
            updated_at: now,
            started_at: None,
            finished_at: None,
        });
    }

    state.repos.pipelines.create(&pipeline, &jobs).await?;

    info!("Pipeline created: {} ({}) with {} job(s)", pipeline.name, pipeline.id, jobs.len());

    Ok(PipelineDetails { pipeline, jobs })
}

/// Get a pipeline by ID
pub async fn get_pipeline(state: &AppState, id: Uuid) -> Result<Pipeline> {
    state
        .repos
        .pipelines
        .find_by_id(id)
        .await?
        .ok_or(PipelineError::NotFound(id))
}

/// Get a pipeline together with its jobs
pub async fn get_pipeline_details(state: &AppState, id: Uuid) -> Result<PipelineDetails> {
    let pipeline = get_pipeline(state, id).await?;
    let jobs = state.repos.jobs.find_by_pipeline(id).await?;
    Ok(PipelineDetails { pipeline, jobs })
}

/// List all pipelines, newest first
pub async fn list_pipelines(state: &AppState) -> Result<Vec<Pipeline>> {
    Ok(state.repos.pipelines.list_all().await?)
}

pub async fn list_jobs(state: &AppState, id: Uuid) -> Result<Vec<Job>> {
    get_pipeline(state, id).await?;
    Ok(state.repos.jobs.find_by_pipeline(id).await?)
}

// =============================================================================
// Engine
// =============================================================================

/// Start a new run of a pipeline
///
/// Starting an active pipeline is not an error: it is answered with the
/// current status as a conflict.
pub async fn start_pipeline(state: &AppState, id: Uuid) -> Result<StartPipelineResponse> {
    let pipeline = get_pipeline(state, id).await?;
    if pipeline.status.is_active() {
        warn!("Pipeline {} is already {}, not starting", id, pipeline.status);
        return Ok(StartPipelineResponse::Conflict { status: pipeline.status });
    }

    let run_id = Uuid::new_v4();
    if !state.repos.pipelines.begin_run(id, run_id).await? {
        // lost a race against another start
        let status = get_pipeline(state, id).await?.status;
        warn!("Pipeline {} could not be started, now {}", id, status);
        return Ok(StartPipelineResponse::Conflict { status });
    }

    info!("Pipeline {} ({}) started, run {}", pipeline.name, id, run_id);

    let jobs = state.repos.jobs.find_by_pipeline(id).await?;
    let graph = JobGraph::new(&jobs);
    let mut failed_roots = Vec::new();

    for root in graph.roots() {
        let Some(job) = jobs.iter().find(|j| j.id == root) else {
            continue;
        };
        if let Err(e) = start_job(state, run_id, job).await {
            error!("Failed to start job {} ({}): {}", job.name, job.id, e);
            failed_roots.push(job.id);
        }
    }

    propagate(state, id, failed_roots).await?;

    Ok(StartPipelineResponse::Accepted { run_id })
}

/// Claims a waiting job and enqueues its first step
///
/// A job claimed by someone else in the meantime is left alone. When the
/// enqueue fails the job is failed right away so the pipeline cannot hang.
async fn start_job(state: &AppState, run_id: Uuid, job: &Job) -> Result<()> {
    let Some(sequence) = state
        .repos
        .jobs
        .claim_dispatch(job.id, &[JobStatus::Waiting], job.dispatch_seq)
        .await?
    else {
        debug!("Job {} already claimed", job.id);
        return Ok(());
    };

    let message = TaskMessage::first_step(job, run_id, sequence);
    if let Err(e) = state.dispatcher.dispatch_task(&message, Duration::ZERO).await {
        state
            .repos
            .jobs
            .complete(job.id, sequence, JobStatus::Failed, Some(format!("failed to enqueue task: {}", e)))
            .await?;
        return Err(e.into());
    }

    info!("Job {} ({}) running", job.name, job.id);
    Ok(())
}

/// Advances the pipeline after a job reached a terminal status
///
/// Only direct dependents of the finished job are re-evaluated.
pub async fn on_job_finished(state: &AppState, pipeline_id: Uuid, job_id: Uuid) -> Result<()> {
    propagate(state, pipeline_id, vec![job_id]).await
}

async fn propagate(state: &AppState, pipeline_id: Uuid, finished: Vec<Uuid>) -> Result<()> {
    let mut worklist: VecDeque<Uuid> = finished.into();

    while let Some(finished_id) = worklist.pop_front() {
        let Some(pipeline) = state.repos.pipelines.find_by_id(pipeline_id).await? else {
            return Ok(());
        };
        let Some(run_id) = pipeline.run_id.filter(|_| pipeline.status.is_active()) else {
            break;
        };

        let jobs = state.repos.jobs.find_by_pipeline(pipeline_id).await?;
        let graph = JobGraph::new(&jobs);

        for dependent_id in graph.dependents(finished_id) {
            let Some(dependent) = jobs.iter().find(|j| j.id == *dependent_id) else {
                continue;
            };
            if dependent.status != JobStatus::Waiting {
                continue;
            }

            match graph.readiness(dependent.id) {
                Readiness::Ready => {
                    if let Err(e) = start_job(state, run_id, dependent).await {
                        error!("Failed to start job {} ({}): {}", dependent.name, dependent.id, e);
                        worklist.push_back(dependent.id);
                    }
                }
                Readiness::Unreachable => {
                    if state
                        .repos
                        .jobs
                        .transition(dependent.id, &[JobStatus::Waiting], JobStatus::Idle, None)
                        .await?
                    {
                        debug!("Job {} ({}) not reached in this run", dependent.name, dependent.id);
                        worklist.push_back(dependent.id);
                    }
                }
                Readiness::ShortCircuit { predecessor } => {
                    let name = jobs
                        .iter()
                        .find(|j| j.id == predecessor)
                        .map(|j| j.name.as_str())
                        .unwrap_or("unknown");
                    let reason = format!("predecessor {} failed", name);
                    if state
                        .repos
                        .jobs
                        .transition(dependent.id, &[JobStatus::Waiting], JobStatus::Failed, Some(reason))
                        .await?
                    {
                        info!("Job {} ({}) failed without running: predecessor {} failed", dependent.name, dependent.id, name);
                        worklist.push_back(dependent.id);
                    }
                }
                Readiness::Blocked => {}
            }
        }
    }

    sync_pipeline_status(state, pipeline_id).await
}

/// Writes the aggregated job status onto an active pipeline
pub async fn sync_pipeline_status(state: &AppState, id: Uuid) -> Result<()> {
    let Some(pipeline) = state.repos.pipelines.find_by_id(id).await? else {
        return Ok(());
    };
    if !pipeline.status.is_active() {
        return Ok(());
    }

    let jobs = state.repos.jobs.find_by_pipeline(id).await?;
    let graph = JobGraph::new(&jobs);

    match graph.aggregate() {
        PipelineStatus::Waiting => {}
        PipelineStatus::Running => {
            if state
                .repos
                .pipelines
                .transition(id, &[PipelineStatus::Waiting], PipelineStatus::Running)
                .await?
            {
                info!("Pipeline {} running", id);
            }
        }
        PipelineStatus::Failed => {
            for job in jobs.iter().filter(|j| j.status == JobStatus::Waiting) {
                state
                    .repos
                    .jobs
                    .transition(
                        job.id,
                        &[JobStatus::Waiting],
                        JobStatus::Failed,
                        Some(ABORTED_BY_PIPELINE_FAILURE.to_string()),
                    )
                    .await?;
            }

            let culprit = graph.culprit();
            let last_error = culprit
                .and_then(|c| jobs.iter().find(|j| j.id == c))
                .and_then(|j| j.last_error.clone());

            if state
                .repos
                .pipelines
                .finish(id, &PipelineStatus::ACTIVE, PipelineStatus::Failed, culprit, last_error.clone())
                .await?
            {
                error!(
                    "Pipeline {} failed (job: {:?}, error: {})",
                    id,
                    culprit,
                    last_error.as_deref().unwrap_or("-")
                );
            }
        }
        PipelineStatus::Succeeded => {
            if state
                .repos
                .pipelines
                .finish(id, &PipelineStatus::ACTIVE, PipelineStatus::Succeeded, None, None)
                .await?
            {
                info!("Pipeline {} succeeded", id);
            }
        }
        PipelineStatus::Idle => {
            state
                .repos
                .pipelines
                .transition(id, &PipelineStatus::ACTIVE, PipelineStatus::Idle)
                .await?;
        }
    }

    Ok(())
}

/// Fails an active pipeline and every unfinished job
///
/// Executions already in flight discard themselves when they return.
pub async fn stop_pipeline(state: &AppState, id: Uuid) -> Result<Pipeline> {
    let pipeline = get_pipeline(state, id).await?;
    if !pipeline.status.is_active() {
        return Err(PipelineError::InvalidState { id, status: pipeline.status });
    }

    let stopped = state
        .repos
        .pipelines
        .finish(
            id,
            &PipelineStatus::ACTIVE,
            PipelineStatus::Failed,
            None,
            Some(STOPPED_BY_OPERATOR.to_string()),
        )
        .await?;
    if !stopped {
        let status = get_pipeline(state, id).await?.status;
        return Err(PipelineError::InvalidState { id, status });
    }

    for job in state.repos.jobs.find_by_pipeline(id).await? {
        if job.status.is_active() {
            state
                .repos
                .jobs
                .transition(
                    job.id,
                    &JobStatus::ACTIVE,
                    JobStatus::Failed,
                    Some(ABORTED_BY_PIPELINE_FAILURE.to_string()),
                )
                .await?;
        }
    }

    info!("Pipeline {} stopped by operator", id);

    get_pipeline(state, id).await
}

/// Forces a pipeline and all of its jobs back to idle
pub async fn reset_pipeline(state: &AppState, id: Uuid) -> Result<ResetReport> {
    get_pipeline(state, id).await?;
    let report = state.repos.pipelines.reset(id).await?;

    if report.is_noop() {
        debug!("Pipeline {} already idle", id);
    } else {
        info!("Pipeline {} reset ({} job(s) idled)", id, report.jobs);
    }

    Ok(report)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_pipeline_request(state: &AppState, req: &CreatePipeline) -> Result<()> {
    if req.name.trim().is_empty() {
        return Err(PipelineError::Validation("Pipeline name cannot be empty".to_string()));
    }

    if req.name.len() > 255 {
        return Err(PipelineError::Validation(
            "Pipeline name is too long (max 255 characters)".to_string(),
        ));
    }

    if let Some(expr) = req.schedule.as_deref().filter(|s| !s.trim().is_empty()) {
        schedule::parse(expr).map_err(|e| PipelineError::Validation(format!("Invalid schedule: {}", e)))?;
    }

    validate_definitions(&req.jobs).map_err(|e| PipelineError::Validation(e.to_string()))?;

    if let Some(job) = req.jobs.iter().find(|j| !state.workers.contains(&j.worker_class)) {
        return Err(PipelineError::Validation(format!(
            "Job '{}' uses unknown worker class '{}'",
            job.name, job.worker_class
        )));
    }

    Ok(())
}
