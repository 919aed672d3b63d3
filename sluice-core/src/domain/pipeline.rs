//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownStatus;

/// Pipeline record
///
/// A pipeline owns an ordered set of jobs forming a dependency graph. Its
/// status is only ever written by the orchestrator's pipeline engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub status: PipelineStatus,
    /// 5-field cron expression for scheduled starts
    pub schedule: Option<String>,
    /// Correlation id of the current (or most recent) run
    pub run_id: Option<Uuid>,
    pub failed_job_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Pipeline lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Idle,
    Waiting,
    Running,
    Succeeded,
    Failed,
}

impl PipelineStatus {
    pub const ACTIVE: [PipelineStatus; 2] = [PipelineStatus::Waiting, PipelineStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Idle => "idle",
            PipelineStatus::Waiting => "waiting",
            PipelineStatus::Running => "running",
            PipelineStatus::Succeeded => "succeeded",
            PipelineStatus::Failed => "failed",
        }
    }

    /// A run is in progress
    pub fn is_active(&self) -> bool {
        matches!(self, PipelineStatus::Waiting | PipelineStatus::Running)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(PipelineStatus::Idle),
            "waiting" => Ok(PipelineStatus::Waiting),
            "running" => Ok(PipelineStatus::Running),
            "succeeded" => Ok(PipelineStatus::Succeeded),
            "failed" => Ok(PipelineStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
