//! Recovery and introspection endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use sluice_core::dto::admin::{ClearTasksReport, ResetReport, TasksInfo};

impl OrchestratorClient {
    /// Force every waiting or running pipeline and job back to idle
    pub async fn reset_statuses(&self) -> Result<ResetReport> {
        let response = self.client.post(self.url("/api/reset/statuses")).send().await?;

        self.handle_response(response).await
    }

    /// Discard every pending task
    pub async fn clear_tasks(&self) -> Result<ClearTasksReport> {
        let response = self.client.post(self.url("/api/clear_tasks")).send().await?;

        self.handle_response(response).await
    }

    /// Queue health: oldest pending task and in-flight count
    pub async fn tasks_info(&self) -> Result<TasksInfo> {
        let response = self.client.get(self.url("/api/tasks_info")).send().await?;

        self.handle_response(response).await
    }
}
