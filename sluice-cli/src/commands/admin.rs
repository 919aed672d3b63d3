//! Recovery and introspection commands

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::config::Config;

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Force every waiting or running pipeline and job back to idle
    ResetStatuses,
    /// Discard every pending task
    ClearTasks {
        /// Confirm discarding queued work
        #[arg(long)]
        yes: bool,
    },
    /// Show queue health
    TasksInfo,
}

pub async fn handle_admin_command(command: AdminCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        AdminCommands::ResetStatuses => {
            let report = client.reset_statuses().await?;
            if report.is_noop() {
                println!("{}", "Nothing was stuck.".yellow());
            } else {
                println!(
                    "{}",
                    format!(
                        "✓ Reset {} pipeline(s) and {} job(s) to idle",
                        report.pipelines, report.jobs
                    )
                    .green()
                    .bold()
                );
            }
        }
        AdminCommands::ClearTasks { yes } => {
            if !yes {
                anyhow::bail!("clear-tasks discards queued work; re-run with --yes to confirm");
            }
            let report = client.clear_tasks().await?;
            println!("{}", format!("✓ Purged {} pending task(s)", report.purged).green().bold());
        }
        AdminCommands::TasksInfo => {
            let info = client.tasks_info().await?;
            let oldest = info
                .oldest_pending_task_timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "none".to_string());

            println!("{}", "Task queue:".bold());
            println!("  Oldest pending: {}", oldest.cyan());
            println!("  In flight:      {}", info.in_flight_count.to_string().cyan());
        }
    }

    Ok(())
}
