//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownStatus;

/// Reason recorded on jobs that never ran because their pipeline failed.
pub const ABORTED_BY_PIPELINE_FAILURE: &str = "aborted by pipeline failure";

/// Job record
///
/// One node of a pipeline's dependency graph. The worker named by
/// `worker_class` is resolved through the worker registry at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    /// Definition order inside the pipeline
    pub position: i32,
    pub status: JobStatus,
    pub worker_class: String,
    pub params: serde_json::Value,
    pub start_conditions: Vec<StartCondition>,
    pub max_retries: u32,
    /// Remaining transient-failure retries for the current run
    pub retries_left: u32,
    /// Sequence number of the most recently enqueued task for this job
    pub dispatch_seq: i64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Waiting,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Waiting, JobStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Waiting | JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(JobStatus::Idle),
            "waiting" => Ok(JobStatus::Waiting),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Dependency of a job on the outcome of another job in the same pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCondition {
    pub preceding_job_id: Uuid,
    pub outcome: RequiredOutcome,
    /// Hand the predecessor's error to this job's worker when it failed
    #[serde(default)]
    pub pass_error: bool,
}

/// Predecessor outcome a start condition waits for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequiredOutcome {
    #[default]
    Succeeded,
    Failed,
    /// Succeeded or failed
    Finished,
}

impl RequiredOutcome {
    /// Whether a terminal predecessor status satisfies this outcome
    pub fn accepts(&self, status: JobStatus) -> bool {
        match self {
            RequiredOutcome::Succeeded => status == JobStatus::Succeeded,
            RequiredOutcome::Failed => status == JobStatus::Failed,
            RequiredOutcome::Finished => status.is_terminal(),
        }
    }

    /// Conditions that still let a dependent run after the predecessor failed
    pub fn tolerates_failure(&self) -> bool {
        matches!(self, RequiredOutcome::Failed | RequiredOutcome::Finished)
    }
}
