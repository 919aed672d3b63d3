//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod admin;
mod job;
mod pipeline;

pub use admin::AdminCommands;
pub use job::JobCommands;
pub use pipeline::PipelineCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline management
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Job inspection
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Recovery and queue introspection
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

/// Route a command to its handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Admin { command } => admin::handle_admin_command(command, config).await,
    }
}

/// Colorize a pipeline or job status for display
fn colorize_status(status: &str) -> ColoredString {
    match status {
        "idle" => status.dimmed(),
        "waiting" => status.yellow(),
        "running" => status.blue().bold(),
        "succeeded" => status.green(),
        "failed" => status.red().bold(),
        _ => status.normal(),
    }
}
