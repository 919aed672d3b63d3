//! ID resolver module
//!
//! Resolves UUID prefixes to full UUIDs by querying the API, so users can
//! type short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result};
use sluice_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a pipeline ID or prefix to a full UUID
pub async fn resolve_pipeline_id(client: &OrchestratorClient, input: &str) -> Result<Uuid> {
    let id = IdOrPrefix::parse(input);
    if let Some(uuid) = id.as_uuid() {
        return Ok(uuid);
    }

    let pipelines = client
        .list_pipelines()
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    id.pick("pipeline", pipelines.iter().map(|p| p.id))
}

/// Resolve a job ID or prefix to a full UUID
///
/// Jobs are only listed per pipeline, so a prefix needs the pipeline it
/// belongs to.
pub async fn resolve_job_id(
    client: &OrchestratorClient,
    input: &str,
    pipeline: Option<&str>,
) -> Result<Uuid> {
    let id = IdOrPrefix::parse(input);
    if let Some(uuid) = id.as_uuid() {
        return Ok(uuid);
    }

    let Some(pipeline) = pipeline else {
        anyhow::bail!("'{}' is not a full job ID; pass --pipeline to resolve a prefix", input);
    };

    let pipeline_id = resolve_pipeline_id(client, pipeline).await?;
    let jobs = client
        .list_pipeline_jobs(pipeline_id)
        .await
        .context("Failed to fetch pipeline jobs for ID resolution")?;

    id.pick("job", jobs.iter().map(|j| j.id))
}
