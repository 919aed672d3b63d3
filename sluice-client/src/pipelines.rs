//! Pipeline-related API endpoints

use crate::OrchestratorClient;
use crate::error::{ClientError, Result};
use reqwest::StatusCode;
use sluice_core::domain::job::Job;
use sluice_core::domain::pipeline::Pipeline;
use sluice_core::dto::admin::ResetReport;
use sluice_core::dto::pipeline::{CreatePipeline, PipelineDetails, StartPipelineResponse};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Definitions
    // =============================================================================

    /// Create a new pipeline from a definition
    ///
    /// # Example
    /// ```no_run
    /// # use sluice_client::OrchestratorClient;
    /// # use sluice_core::dto::pipeline::CreatePipeline;
    /// # async fn example() -> sluice_client::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let details = client.create_pipeline(CreatePipeline {
    ///     name: "nightly-sync".to_string(),
    ///     schedule: Some("0 2 * * *".to_string()),
    ///     jobs: Vec::new(),
    /// }).await?;
    /// println!("Created pipeline {}", details.pipeline.id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_pipeline(&self, req: CreatePipeline) -> Result<PipelineDetails> {
        let response = self.client.post(self.url("/api/pipeline/create")).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// List all pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let response = self.client.get(self.url("/api/pipeline/list")).send().await?;

        self.handle_response(response).await
    }

    /// Get a pipeline together with its jobs
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<PipelineDetails> {
        let url = self.url(&format!("/api/pipeline/{}", pipeline_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List the jobs of a pipeline
    pub async fn list_pipeline_jobs(&self, pipeline_id: Uuid) -> Result<Vec<Job>> {
        let url = self.url(&format!("/api/pipeline/{}/jobs", pipeline_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Operator Controls
    // =============================================================================

    /// Request a new run of a pipeline
    ///
    /// A pipeline that is already active answers with
    /// [`StartPipelineResponse::Conflict`] rather than an error.
    pub async fn start_pipeline(&self, pipeline_id: Uuid) -> Result<StartPipelineResponse> {
        let url = self.url(&format!("/api/pipeline/{}/start", pipeline_id));
        let response = self.client.post(&url).send().await?;

        if response.status() == StatusCode::CONFLICT {
            return response
                .json()
                .await
                .map_err(|e| ClientError::ParseError(format!("Failed to parse conflict response: {}", e)));
        }

        self.handle_response(response).await
    }

    /// Stop the current run of a pipeline
    pub async fn stop_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let url = self.url(&format!("/api/pipeline/{}/stop", pipeline_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Force a pipeline and its jobs back to idle
    pub async fn reset_pipeline(&self, pipeline_id: Uuid) -> Result<ResetReport> {
        let url = self.url(&format!("/api/pipeline/{}/reset", pipeline_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }
}
