//! Job-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use sluice_core::domain::job::Job;
use sluice_core::domain::log::LogEntry;
use uuid::Uuid;

impl OrchestratorClient {
    /// Get a job by ID
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        let url = self.url(&format!("/api/job/{}", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get the log lines recorded for a job, oldest first
    pub async fn get_job_logs(&self, job_id: Uuid) -> Result<Vec<LogEntry>> {
        let url = self.url(&format!("/api/job/{}/logs", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
