//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, RequiredOutcome};
use crate::domain::pipeline::{Pipeline, PipelineStatus};

/// Request to define a new pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub name: String,
    #[serde(default)]
    pub schedule: Option<String>,
    pub jobs: Vec<JobDefinition>,
}

/// One job of a pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub worker_class: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub start_conditions: Vec<ConditionDefinition>,
}

/// Start condition referencing another job of the same definition by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub job: String,
    #[serde(default)]
    pub outcome: RequiredOutcome,
    #[serde(default)]
    pub pass_error: bool,
}

/// Pipeline together with its jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDetails {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    pub jobs: Vec<Job>,
}

/// Result of a start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StartPipelineResponse {
    Accepted { run_id: Uuid },
    /// The pipeline already has a run in progress
    Conflict { status: PipelineStatus },
}
