//! Schedule Service
//!
//! Handles `start-pipeline` messages and runs the once-a-minute trigger that
//! produces the scheduled ones.

use chrono::{DateTime, Utc};
use sluice_core::domain::task::StartPipelinesMessage;
use sluice_core::dto::pipeline::StartPipelineResponse;
use sluice_core::schedule;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::service::pipeline::{self, PipelineError};
use crate::state::AppState;

const TICK: Duration = Duration::from_secs(60);

/// Starts the pipelines a `start-pipeline` message asks for
///
/// `at` is the time the message was enqueued, so a delayed delivery still
/// evaluates schedules against the minute it was meant for. Returns the ids
/// of the pipelines that were started.
pub async fn start_pipelines(
    state: &AppState,
    message: &StartPipelinesMessage,
    at: DateTime<Utc>,
) -> Result<Vec<Uuid>, PipelineError> {
    let mut started = Vec::new();

    if message.scheduled {
        started.extend(start_due_pipelines(state, at).await?);
    }

    for id in &message.pipeline_ids {
        match pipeline::start_pipeline(state, *id).await {
            Ok(StartPipelineResponse::Accepted { .. }) => started.push(*id),
            Ok(StartPipelineResponse::Conflict { status }) => {
                info!("Pipeline {} not started, already {}", id, status);
            }
            Err(PipelineError::NotFound(id)) => warn!("Requested start of unknown pipeline {}", id),
            Err(e) => return Err(e),
        }
    }

    Ok(started)
}

async fn start_due_pipelines(state: &AppState, at: DateTime<Utc>) -> Result<Vec<Uuid>, PipelineError> {
    let minute = schedule::minute_of(at);
    let mut started = Vec::new();

    for candidate in state.repos.pipelines.list_scheduled().await? {
        let Some(expr) = candidate.schedule.as_deref() else {
            continue;
        };

        match schedule::is_due(expr, at) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("Pipeline {} has an invalid schedule '{}': {}", candidate.id, expr, e);
                continue;
            }
        }

        // a redelivered trigger for the same minute must not start it twice
        if candidate.started_at.is_some_and(|t| t >= minute) {
            debug!("Pipeline {} already started this minute", candidate.id);
            continue;
        }

        match pipeline::start_pipeline(state, candidate.id).await? {
            StartPipelineResponse::Accepted { run_id } => {
                info!("Scheduled start of pipeline {} ({}), run {}", candidate.name, candidate.id, run_id);
                started.push(candidate.id);
            }
            StartPipelineResponse::Conflict { status } => {
                warn!("Scheduled start of pipeline {} skipped, still {}", candidate.id, status);
            }
        }
    }

    Ok(started)
}

/// Enqueues a scheduled-start trigger once a minute
pub fn spawn_scheduler(dispatcher: Dispatcher) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting scheduler (interval: {:?})", TICK);

        let mut ticker = time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if let Err(e) = dispatcher.request_scheduled_start().await {
                error!("Failed to enqueue scheduled start: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestHarness, job, pipeline_request};
    use chrono::TimeZone;
    use sluice_core::domain::pipeline::PipelineStatus;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, s).unwrap()
    }

    async fn scheduled(harness: &TestHarness, expr: &str) -> Uuid {
        let mut req = pipeline_request(vec![job("a")]);
        req.schedule = Some(expr.to_string());
        pipeline::create_pipeline(&harness.state, req).await.unwrap().pipeline.id
    }

    fn trigger() -> StartPipelinesMessage {
        StartPipelinesMessage {
            scheduled: true,
            pipeline_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_scheduled_trigger_starts_due_pipelines_only() {
        let harness = TestHarness::new();
        let hourly = scheduled(&harness, "0 * * * *").await;
        let nightly = scheduled(&harness, "30 2 * * *").await;
        let manual = harness.create(vec![job("b")]).await.pipeline.id;

        let started = start_pipelines(&harness.state, &trigger(), at(9, 0, 12)).await.unwrap();

        assert_eq!(started, vec![hourly]);
        assert_eq!(harness.pipeline(hourly).await.status, PipelineStatus::Running);
        assert_eq!(harness.pipeline(nightly).await.status, PipelineStatus::Idle);
        assert_eq!(harness.pipeline(manual).await.status, PipelineStatus::Idle);
    }

    #[tokio::test]
    async fn test_conflicting_scheduled_start_is_skipped() {
        let harness = TestHarness::new();
        let id = scheduled(&harness, "* * * * *").await;
        harness.start(id).await;

        let started = start_pipelines(&harness.state, &trigger(), Utc::now()).await.unwrap();

        assert!(started.is_empty());
        assert_eq!(harness.pending_tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_trigger_in_same_minute_starts_once() {
        let harness = TestHarness::new();
        let id = scheduled(&harness, "* * * * *").await;
        let now = Utc::now();

        assert_eq!(start_pipelines(&harness.state, &trigger(), now).await.unwrap(), vec![id]);
        harness.drain().await;
        assert_eq!(harness.pipeline(id).await.status, PipelineStatus::Succeeded);

        assert!(start_pipelines(&harness.state, &trigger(), now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_ids_are_started() {
        let harness = TestHarness::new();
        let id = harness.create(vec![job("a")]).await.pipeline.id;
        let message = StartPipelinesMessage {
            scheduled: false,
            pipeline_ids: vec![id, Uuid::new_v4()],
        };

        let started = start_pipelines(&harness.state, &message, Utc::now()).await.unwrap();
        assert_eq!(started, vec![id]);
    }
}
