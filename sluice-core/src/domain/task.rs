//! Task message types
//!
//! A task is one queued dispatch of a job step. Tasks only live inside the
//! task queue; these are the payloads it carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::Job;

/// Resumable state of a long-running external operation
///
/// Carried by continuation tasks so a respawned execution resumes polling
/// the same external resource instead of creating a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Handle of the external operation
    pub resource: String,
    /// Wait accumulated across every execution so far
    pub total_wait_secs: u64,
    /// Position in the poll backoff schedule
    pub backoff_cursor: usize,
}

impl Checkpoint {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            total_wait_secs: 0,
            backoff_cursor: 0,
        }
    }
}

/// Payload of a `start-task` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub pipeline_id: Uuid,
    pub job_id: Uuid,
    pub run_id: Uuid,
    /// Dispatch sequence; must match the job's current `dispatch_seq`
    pub sequence: i64,
    pub worker_class: String,
    pub params: serde_json::Value,
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
    /// Transient retries already spent on this step
    #[serde(default)]
    pub attempt: u32,
}

impl TaskMessage {
    /// First step of a job, built from its configuration
    pub fn first_step(job: &Job, run_id: Uuid, sequence: i64) -> Self {
        Self {
            pipeline_id: job.pipeline_id,
            job_id: job.id,
            run_id,
            sequence,
            worker_class: job.worker_class.clone(),
            params: job.params.clone(),
            checkpoint: None,
            attempt: 0,
        }
    }

    /// The same step again, after a transient failure
    pub fn retry(&self, sequence: i64) -> Self {
        Self {
            sequence,
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    /// A follow-up step requested by the worker itself
    pub fn continuation(
        &self,
        sequence: i64,
        worker_class: String,
        params: serde_json::Value,
        checkpoint: Option<Checkpoint>,
    ) -> Self {
        Self {
            pipeline_id: self.pipeline_id,
            job_id: self.job_id,
            run_id: self.run_id,
            sequence,
            worker_class,
            params,
            checkpoint,
            attempt: 0,
        }
    }
}

/// Payload of a `start-pipeline` message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPipelinesMessage {
    /// Start every pipeline whose schedule fires this minute
    #[serde(default)]
    pub scheduled: bool,
    #[serde(default)]
    pub pipeline_ids: Vec<Uuid>,
}

/// Body of a push delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub task_id: Uuid,
    pub topic: String,
    pub delivery_attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}
