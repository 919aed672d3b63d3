//! Job command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use sluice_client::OrchestratorClient;
use sluice_core::domain::job::Job;
use sluice_core::domain::log::{LogEntry, LogLevel};

use super::colorize_status;
use crate::config::Config;
use crate::id_resolver::resolve_job_id;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Get job details
    Get {
        /// Job ID, or a prefix together with --pipeline
        id: String,

        /// Pipeline to resolve a job ID prefix in
        #[arg(short, long)]
        pipeline: Option<String>,
    },
    /// Get job logs
    Logs {
        /// Job ID, or a prefix together with --pipeline
        id: String,

        /// Pipeline to resolve a job ID prefix in
        #[arg(short, long)]
        pipeline: Option<String>,
    },
}

/// Handle job commands
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::Get { id, pipeline } => get_job(&client, &id, pipeline.as_deref()).await,
        JobCommands::Logs { id, pipeline } => get_job_logs(&client, &id, pipeline.as_deref()).await,
    }
}

async fn get_job(client: &OrchestratorClient, id: &str, pipeline: Option<&str>) -> Result<()> {
    let uuid = resolve_job_id(client, id, pipeline).await?;
    let job = client.get_job(uuid).await?;

    print_job_details(&job);

    Ok(())
}

async fn get_job_logs(client: &OrchestratorClient, id: &str, pipeline: Option<&str>) -> Result<()> {
    let uuid = resolve_job_id(client, id, pipeline).await?;
    let logs = client.get_job_logs(uuid).await?;

    if logs.is_empty() {
        println!("{}", "No logs found for this job.".yellow());
    } else {
        println!("{}", format!("Logs for job {}:", uuid).bold());
        println!("{}", "─".repeat(80).dimmed());
        for log in logs {
            print_log_entry(&log);
        }
        println!("{}", "─".repeat(80).dimmed());
    }

    Ok(())
}

fn print_job_details(job: &Job) {
    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.id.to_string().cyan());
    println!("  Name:        {}", job.name.bold());
    println!("  Pipeline ID: {}", job.pipeline_id.to_string().dimmed());
    println!("  Status:      {}", colorize_status(job.status.as_str()));
    println!("  Worker:      {}", job.worker_class);
    println!("  Retries:     {}/{} left", job.retries_left, job.max_retries);

    if let Some(started) = job.started_at {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(finished) = job.finished_at {
        println!("  Finished:    {}", finished.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.started_at {
            let duration = finished.signed_duration_since(started);
            println!("  Duration:    {}s", duration.num_seconds());
        }
    }

    if !job.start_conditions.is_empty() {
        println!("\n{}", "Start conditions:".bold());
        for condition in &job.start_conditions {
            println!(
                "  {} {:?}{}",
                condition.preceding_job_id.to_string().dimmed(),
                condition.outcome,
                if condition.pass_error { " (pass error)" } else { "" }
            );
        }
    }

    if !job.params.is_null() {
        println!("\n{}", "Params:".bold());
        match serde_json::to_string_pretty(&job.params) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{}", job.params),
        }
    }

    if let Some(error) = &job.last_error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}

fn print_log_entry(log: &LogEntry) {
    let level_str = log.level.as_str().to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}
