//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain; `push` receives
//! the task deliveries of the dispatcher.

pub mod admin;
pub mod error;
pub mod health;
pub mod job;
pub mod pipeline;
pub mod push;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/api/pipeline/create", post(pipeline::create_pipeline))
        .route("/api/pipeline/list", get(pipeline::list_pipelines))
        .route("/api/pipeline/{id}", get(pipeline::get_pipeline))
        .route("/api/pipeline/{id}/jobs", get(pipeline::list_pipeline_jobs))
        .route("/api/pipeline/{id}/start", post(pipeline::start_pipeline))
        .route("/api/pipeline/{id}/stop", post(pipeline::stop_pipeline))
        .route("/api/pipeline/{id}/reset", post(pipeline::reset_pipeline))
        // Job endpoints
        .route("/api/job/{id}", get(job::get_job))
        .route("/api/job/{id}/logs", get(job::get_job_logs))
        // Recovery & introspection
        .route("/api/reset/statuses", post(admin::reset_statuses))
        .route("/api/clear_tasks", post(admin::clear_tasks))
        .route("/api/tasks_info", get(admin::tasks_info))
        // Push subscribers
        .route("/push/start-task", post(push::start_task))
        .route("/push/start-pipeline", post(push::start_pipeline))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use crate::testing::{TestHarness, job, pipeline_request};
    use reqwest::StatusCode;
    use serde_json::{Value, json};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_health_check() {
        let base = TestHarness::new().serve().await;
        let body: Value = reqwest::get(format!("{}/health", base)).await.unwrap().json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_then_start_twice() {
        let harness = TestHarness::new();
        let base = harness.serve().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/api/pipeline/create", base))
            .json(&pipeline_request(vec![job("a")]))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Value = response.json().await.unwrap();
        let id = created["pipeline"]["id"].as_str().unwrap().to_string();

        let first = client
            .post(format!("{}/api/pipeline/{}/start", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let first: Value = first.json().await.unwrap();
        assert_eq!(first["result"], "accepted");

        let second = client
            .post(format!("{}/api/pipeline/{}/start", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let second: Value = second.json().await.unwrap();
        assert_eq!(second, json!({ "result": "conflict", "status": "running" }));
    }

    #[tokio::test]
    async fn test_invalid_definition_is_rejected() {
        let base = TestHarness::new().serve().await;
        let mut bad = job("a");
        bad.worker_class = "NoSuchWorker".to_string();

        let response = reqwest::Client::new()
            .post(format!("{}/api/pipeline/create", base))
            .json(&pipeline_request(vec![bad]))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("NoSuchWorker"));
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_not_found() {
        let base = TestHarness::new().serve().await;
        let response = reqwest::get(format!("{}/api/pipeline/{}", base, Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tasks_info_on_empty_queue() {
        let base = TestHarness::new().serve().await;
        let body: Value = reqwest::get(format!("{}/api/tasks_info", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body, json!({ "oldestPendingTaskTimestamp": null, "inFlightCount": 0 }));
    }
}
