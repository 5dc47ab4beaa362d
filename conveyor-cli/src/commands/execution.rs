//! Execution command handlers
//!
//! Triggering, cancelling and following executions.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use conveyor_client::OrchestratorClient;
use conveyor_core::domain::execution::Execution;
use conveyor_core::dto::execution::{ExecutionStatusView, TriggerExecution};
use std::time::Duration;
use uuid::Uuid;

use super::colorize_status;
use crate::config::Config;
use crate::id_resolver::{resolve_execution_id, resolve_pipeline_id};
use crate::types::IdOrPrefix;

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Execution subcommands
#[derive(Subcommand)]
pub enum ExecutionCommands {
    /// Trigger a pipeline run
    Trigger {
        /// Pipeline ID or unambiguous prefix
        pipeline: String,

        /// Target environment (development, staging or production)
        #[arg(short, long = "env")]
        environment: String,

        /// Branch to check out (defaults to the pipeline's default branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Stream logs until the execution finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Cancel an in-flight execution
    Cancel {
        /// Execution ID or unambiguous prefix
        id: String,
    },
    /// Show status and timing of an execution
    Status {
        /// Execution ID or unambiguous prefix
        id: String,
    },
    /// Print execution logs
    Logs {
        /// Execution ID or unambiguous prefix
        id: String,

        /// Keep printing new output until the execution finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Show the full execution record
    Get {
        /// Execution ID or unambiguous prefix
        id: String,
    },
    /// List executions of a pipeline, newest first
    List {
        /// Pipeline ID or unambiguous prefix
        pipeline: String,
    },
}

/// Handle execution commands
pub async fn handle_execution_command(command: ExecutionCommands, config: &Config) -> Result<()> {
    let client = config.client()?;

    match command {
        ExecutionCommands::Trigger {
            pipeline,
            environment,
            branch,
            follow,
        } => trigger_execution(&client, &pipeline, environment, branch, follow).await,
        ExecutionCommands::Cancel { id } => cancel_execution(&client, &id).await,
        ExecutionCommands::Status { id } => show_status(&client, &id).await,
        ExecutionCommands::Logs { id, follow } => {
            let uuid = resolve_execution_id(&client, &IdOrPrefix::parse(&id)).await?;
            if follow {
                follow_logs(&client, uuid).await
            } else {
                print_logs(&client, uuid).await
            }
        }
        ExecutionCommands::Get { id } => get_execution(&client, &id).await,
        ExecutionCommands::List { pipeline } => list_executions(&client, &pipeline).await,
    }
}

/// Trigger an execution
async fn trigger_execution(
    client: &OrchestratorClient,
    pipeline: &str,
    environment: String,
    branch: Option<String>,
    follow: bool,
) -> Result<()> {
    let pipeline_id = resolve_pipeline_id(client, &IdOrPrefix::parse(pipeline)).await?;

    let triggered = client
        .trigger_execution(TriggerExecution {
            pipeline_id,
            branch,
            environment,
        })
        .await?;

    println!("{}", "✓ Execution triggered!".green().bold());
    println!(
        "  Execution ID: {}",
        triggered.execution_id.to_string().cyan()
    );
    println!("  Pipeline ID:  {}", pipeline_id.to_string().dimmed());

    if follow {
        println!();
        follow_logs(client, triggered.execution_id).await?;
    }

    Ok(())
}

/// Request cancellation
async fn cancel_execution(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_execution_id(client, &IdOrPrefix::parse(id)).await?;

    let outcome = client.cancel_execution(uuid).await?;

    if outcome.cancelled {
        println!(
            "{}",
            format!("✓ Cancellation requested for {}", uuid).green().bold()
        );
    } else {
        println!(
            "{}",
            format!("Execution {} is not running; nothing to cancel.", uuid).yellow()
        );
    }

    Ok(())
}

/// Show status and timing
async fn show_status(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_execution_id(client, &IdOrPrefix::parse(id)).await?;

    let view = client.get_execution_status(uuid).await?;

    print_status(uuid, &view);

    Ok(())
}

/// Print the logs persisted so far
async fn print_logs(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let snapshot = client.get_execution_logs(id).await?;

    if snapshot.logs.is_empty() {
        println!("{}", "No logs yet for this execution.".yellow());
    } else {
        println!("{}", format!("Logs for execution {}:", id).bold());
        println!("{}", "─".repeat(80).dimmed());
        print!("{}", snapshot.logs);
        if !snapshot.logs.ends_with('\n') {
            println!();
        }
        println!("{}", "─".repeat(80).dimmed());
    }
    println!("Status: {}", colorize_status(snapshot.status));

    Ok(())
}

/// Poll the log snapshot and print what was appended since the last poll
///
/// Logs only grow until the execution is terminal, so the printed length is
/// a valid offset into every later snapshot.
async fn follow_logs(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let mut printed = 0;

    loop {
        let snapshot = client.get_execution_logs(id).await?;

        if let Some(delta) = snapshot.logs.get(printed..) {
            print!("{}", delta);
        }
        printed = snapshot.logs.len();

        if snapshot.status.is_terminal() {
            if !snapshot.logs.is_empty() && !snapshot.logs.ends_with('\n') {
                println!();
            }
            println!(
                "{} {}",
                "Execution finished:".bold(),
                colorize_status(snapshot.status)
            );
            return Ok(());
        }

        tokio::time::sleep(FOLLOW_POLL_INTERVAL).await;
    }
}

/// Get and display the full record
async fn get_execution(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_execution_id(client, &IdOrPrefix::parse(id)).await?;

    let execution = client.get_execution(uuid).await?;

    print_execution_details(&execution);

    Ok(())
}

/// List executions of a pipeline
async fn list_executions(client: &OrchestratorClient, pipeline: &str) -> Result<()> {
    let pipeline_id = resolve_pipeline_id(client, &IdOrPrefix::parse(pipeline)).await?;

    let executions = client.list_pipeline_executions(pipeline_id).await?;

    if executions.is_empty() {
        println!(
            "{}",
            format!("No executions found for pipeline {}.", pipeline_id).yellow()
        );
    } else {
        println!(
            "{}",
            format!(
                "Found {} execution(s) for pipeline {}:",
                executions.len(),
                pipeline_id
            )
            .bold()
        );
        println!();
        for execution in executions {
            print_execution_summary(&execution);
        }
    }

    Ok(())
}

fn print_status(id: Uuid, view: &ExecutionStatusView) {
    println!("{}", format!("Execution {}", id).bold());
    println!("  Status:   {}", colorize_status(view.status));
    if let Some(started) = view.started_at {
        println!("  Started:  {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(ended) = view.ended_at {
        println!("  Ended:    {}", ended.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(seconds) = view.duration_seconds {
        println!("  Duration: {}s", seconds);
    }
}

/// Print an execution summary
fn print_execution_summary(execution: &Execution) {
    println!(
        "  {} Execution {}",
        "▸".cyan(),
        execution.id.to_string().dimmed()
    );
    println!("    Status:      {}", colorize_status(execution.status));
    println!("    Branch:      {}", execution.branch);
    println!("    Environment: {}", execution.environment);
    println!(
        "    Created:     {}",
        execution
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

/// Print detailed execution information
fn print_execution_details(execution: &Execution) {
    println!("{}", "Execution Details:".bold());
    println!("  ID:          {}", execution.id.to_string().cyan());
    println!("  Pipeline ID: {}", execution.pipeline_id.to_string().dimmed());
    println!("  Status:      {}", colorize_status(execution.status));
    println!("  Branch:      {}", execution.branch);
    println!("  Environment: {}", execution.environment);
    println!(
        "  Created:     {}",
        execution.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(started) = execution.started_at {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(ended) = execution.ended_at {
        println!("  Ended:       {}", ended.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(seconds) = execution.duration_seconds() {
        println!("  Duration:    {}s", seconds);
    }

    println!("\n{}", "Logs:".bold());
    println!("{}", "─".repeat(80).dimmed());
    print!("{}", execution.logs);
    if !execution.logs.ends_with('\n') {
        println!();
    }
    println!("{}", "─".repeat(80).dimmed());
}
