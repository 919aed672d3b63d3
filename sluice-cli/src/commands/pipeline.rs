//! Pipeline command handlers
//!
//! Creation from a JSON definition, listing, inspection and the operator
//! controls (start, stop, reset).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::*;
use sluice_client::OrchestratorClient;
use sluice_core::domain::job::Job;
use sluice_core::domain::pipeline::Pipeline;
use sluice_core::dto::pipeline::{CreatePipeline, StartPipelineResponse};

use super::colorize_status;
use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create a new pipeline from a JSON definition
    Create {
        /// Path to the pipeline definition file
        file: String,

        /// Override the pipeline name from the file
        #[arg(short, long)]
        name: Option<String>,

        /// Override the cron schedule from the file
        #[arg(short, long)]
        schedule: Option<String>,
    },
    /// List all pipelines
    List,
    /// Get pipeline details
    Get {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// List the jobs of a pipeline
    Jobs {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// Start a new run
    Start {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// Stop the current run
    Stop {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// Force the pipeline and its jobs back to idle
    Reset {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
}

/// Handle pipeline commands
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        PipelineCommands::Create { file, name, schedule } => {
            create_pipeline(&client, &file, name, schedule).await
        }
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Get { id } => get_pipeline(&client, &id).await,
        PipelineCommands::Jobs { id } => list_jobs(&client, &id).await,
        PipelineCommands::Start { id } => start_pipeline(&client, &id).await,
        PipelineCommands::Stop { id } => stop_pipeline(&client, &id).await,
        PipelineCommands::Reset { id } => reset_pipeline(&client, &id).await,
    }
}

fn read_definition(path: &str) -> Result<CreatePipeline> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read definition file: {}", path))?;

    serde_json::from_str(&content).with_context(|| format!("Invalid pipeline definition in {}", path))
}

async fn create_pipeline(
    client: &OrchestratorClient,
    path: &str,
    name_override: Option<String>,
    schedule_override: Option<String>,
) -> Result<()> {
    let mut req = read_definition(path)?;
    if let Some(name) = name_override {
        req.name = name;
    }
    if schedule_override.is_some() {
        req.schedule = schedule_override;
    }

    let details = client.create_pipeline(req).await?;

    println!("{}", "✓ Pipeline created successfully!".green().bold());
    println!("  ID:       {}", details.pipeline.id.to_string().cyan());
    println!("  Name:     {}", details.pipeline.name.bold());
    if let Some(schedule) = &details.pipeline.schedule {
        println!("  Schedule: {}", schedule.dimmed());
    }
    println!(
        "  Jobs:     {}",
        details
            .jobs
            .iter()
            .map(|j| j.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
            .dimmed()
    );

    Ok(())
}

async fn list_pipelines(client: &OrchestratorClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} pipeline(s):", pipelines.len()).bold());
    println!();
    for pipeline in pipelines {
        print_pipeline_summary(&pipeline);
    }

    Ok(())
}

async fn get_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;
    let details = client.get_pipeline(uuid).await?;

    print_pipeline_details(&details.pipeline);

    println!("\n{}", "Jobs:".bold());
    for job in &details.jobs {
        print_job_line(job);
    }

    Ok(())
}

async fn list_jobs(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;
    let jobs = client.list_pipeline_jobs(uuid).await?;

    println!("{}", format!("{} job(s) in pipeline {}:", jobs.len(), uuid).bold());
    for job in &jobs {
        print_job_line(job);
    }

    Ok(())
}

async fn start_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;

    match client.start_pipeline(uuid).await? {
        StartPipelineResponse::Accepted { run_id } => {
            println!("{}", "✓ Pipeline started".green().bold());
            println!("  Run: {}", run_id.to_string().cyan());
        }
        StartPipelineResponse::Conflict { status } => {
            println!(
                "{} pipeline is already {}",
                "⚠ Not started:".yellow().bold(),
                colorize_status(status.as_str())
            );
        }
    }

    Ok(())
}

async fn stop_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;
    let pipeline = client.stop_pipeline(uuid).await?;

    println!(
        "{} {} is now {}",
        "✓ Stopped".green().bold(),
        pipeline.name.bold(),
        colorize_status(pipeline.status.as_str())
    );

    Ok(())
}

async fn reset_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;
    let report = client.reset_pipeline(uuid).await?;

    if report.is_noop() {
        println!("{}", "Nothing to reset.".yellow());
    } else {
        println!("{}", format!("✓ Reset {} job(s) to idle", report.jobs).green().bold());
    }

    Ok(())
}

fn print_pipeline_summary(pipeline: &Pipeline) {
    println!("  {} {}", "▸".cyan(), pipeline.name.bold());
    println!("    ID:      {}", pipeline.id.to_string().dimmed());
    println!("    Status:  {}", colorize_status(pipeline.status.as_str()));
    if let Some(schedule) = &pipeline.schedule {
        println!("    Cron:    {}", schedule.dimmed());
    }
    println!();
}

fn print_pipeline_details(pipeline: &Pipeline) {
    println!("{}", "Pipeline Details:".bold());
    println!("  ID:       {}", pipeline.id.to_string().cyan());
    println!("  Name:     {}", pipeline.name.bold());
    println!("  Status:   {}", colorize_status(pipeline.status.as_str()));
    if let Some(expr) = &pipeline.schedule {
        println!("  Schedule: {}", expr);
        if let Some(next) = next_run(expr, Utc::now()) {
            println!("  Next run: {}", next);
        }
    }
    if let Some(run_id) = pipeline.run_id {
        println!("  Run:      {}", run_id);
    }
    println!("  Created:  {}", pipeline.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(started) = pipeline.started_at {
        println!("  Started:  {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(finished) = pipeline.finished_at {
        println!("  Finished: {}", finished.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = &pipeline.last_error {
        println!("\n{}", "Error:".bold());
        if let Some(job_id) = pipeline.failed_job_id {
            println!("  Job {}", job_id.to_string().dimmed());
        }
        println!("  {}", error.red());
    }
}

/// Next firing of a schedule, formatted for display
fn next_run(expr: &str, now: DateTime<Utc>) -> Option<String> {
    sluice_core::schedule::next_after(expr, now)
        .ok()
        .flatten()
        .map(|next| next.format("%Y-%m-%d %H:%M UTC").to_string())
}

fn print_job_line(job: &Job) {
    println!(
        "  {} {:<24} {:<10} {}",
        "▸".cyan(),
        job.name.bold(),
        colorize_status(job.status.as_str()),
        job.id.to_string().dimmed()
    );
}
