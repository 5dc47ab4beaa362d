//! Pipeline command handlers
//!
//! Handles pipeline creation, listing, viewing and deletion.

use anyhow::{Result, anyhow};
use clap::Subcommand;
use colored::*;
use conveyor_client::OrchestratorClient;
use conveyor_core::domain::pipeline::{Environment, Pipeline, PipelineConfig};
use conveyor_core::dto::pipeline::CreatePipeline;

use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;
use crate::types::IdOrPrefix;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create a new pipeline
    Create {
        /// Pipeline name
        #[arg(short, long)]
        name: String,

        /// Git repository URL
        #[arg(short, long)]
        repository: String,

        /// Description
        #[arg(short, long)]
        description: Option<String>,

        /// Branch used when a trigger names none (defaults to main)
        #[arg(short, long)]
        branch: Option<String>,

        /// Allowed environments (comma-separated; empty allows all)
        #[arg(short, long = "env", value_delimiter = ',')]
        environments: Vec<Environment>,

        /// Build command
        #[arg(long)]
        build: Option<String>,

        /// Test command
        #[arg(long)]
        test: Option<String>,

        /// Deploy command, run for production only
        #[arg(long)]
        deploy: Option<String>,

        /// Environment variables for every step as KEY=value
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,
    },
    /// List all pipelines
    List,
    /// Get pipeline details
    Get {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// Delete a pipeline and its execution history
    Delete {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    if key.is_empty() {
        return Err(anyhow!("invalid KEY=value: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Handle pipeline commands
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = config.client()?;

    match command {
        PipelineCommands::Create {
            name,
            repository,
            description,
            branch,
            environments,
            build,
            test,
            deploy,
            vars,
        } => {
            let req = CreatePipeline {
                name,
                description,
                repository,
                default_branch: branch,
                environments,
                config: pipeline_config(build, test, deploy, vars),
            };
            create_pipeline(&client, req).await
        }
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Get { id } => get_pipeline(&client, &id).await,
        PipelineCommands::Delete { id } => delete_pipeline(&client, &id).await,
    }
}

/// Builds the step configuration, or None to let the orchestrator apply defaults
fn pipeline_config(
    build: Option<String>,
    test: Option<String>,
    deploy: Option<String>,
    vars: Vec<(String, String)>,
) -> Option<PipelineConfig> {
    if build.is_none() && test.is_none() && deploy.is_none() && vars.is_empty() {
        return None;
    }

    let defaults = PipelineConfig::default();
    Some(PipelineConfig {
        build_command: build.unwrap_or(defaults.build_command),
        test_command: test.unwrap_or(defaults.test_command),
        deploy_command: deploy.unwrap_or(defaults.deploy_command),
        env_vars: vars.into_iter().collect(),
    })
}

/// Create a new pipeline
async fn create_pipeline(client: &OrchestratorClient, req: CreatePipeline) -> Result<()> {
    let pipeline = client.create_pipeline(req).await?;

    println!("{}", "✓ Pipeline created successfully!".green().bold());
    println!("  ID:         {}", pipeline.id.to_string().cyan());
    println!("  Name:       {}", pipeline.name.bold());
    println!("  Repository: {}", pipeline.repository.dimmed());

    Ok(())
}

/// List all pipelines
async fn list_pipelines(client: &OrchestratorClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in pipelines {
            print_pipeline_summary(&pipeline);
        }
    }

    Ok(())
}

/// Get and display a single pipeline
async fn get_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;

    let pipeline = client.get_pipeline(uuid).await?;

    print_pipeline_details(&pipeline);

    Ok(())
}

/// Delete a pipeline
async fn delete_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;

    client.delete_pipeline(uuid).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} deleted successfully!", uuid)
            .green()
            .bold()
    );

    Ok(())
}

fn environments_label(pipeline: &Pipeline) -> String {
    if pipeline.environments.is_empty() {
        "all".to_string()
    } else {
        pipeline
            .environments
            .iter()
            .map(Environment::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Print a pipeline summary
fn print_pipeline_summary(pipeline: &Pipeline) {
    println!("  {} {}", "▸".cyan(), pipeline.name.bold());
    println!("    ID:           {}", pipeline.id.to_string().dimmed());
    println!("    Repository:   {}", pipeline.repository.dimmed());
    println!("    Environments: {}", environments_label(pipeline).dimmed());
    println!(
        "    Created:      {}",
        pipeline
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

/// Print detailed pipeline information
fn print_pipeline_details(pipeline: &Pipeline) {
    println!("{}", "Pipeline Details:".bold());
    println!("  ID:             {}", pipeline.id.to_string().cyan());
    println!("  Name:           {}", pipeline.name.bold());
    if let Some(desc) = &pipeline.description {
        println!("  Description:    {}", desc);
    }
    println!("  Repository:     {}", pipeline.repository);
    println!("  Default branch: {}", pipeline.default_branch);
    println!("  Environments:   {}", environments_label(pipeline));
    println!(
        "  Created:        {}",
        pipeline.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Updated:        {}",
        pipeline.updated_at.format("%Y-%m-%d %H:%M:%S")
    );

    println!("\n{}", "Steps:".bold());
    println!("  build:  {}", pipeline.config.build_command.cyan());
    println!("  test:   {}", pipeline.config.test_command.cyan());
    println!(
        "  deploy: {} {}",
        pipeline.config.deploy_command.cyan(),
        "(production only)".dimmed()
    );

    if !pipeline.config.env_vars.is_empty() {
        let mut vars: Vec<_> = pipeline.config.env_vars.iter().collect();
        vars.sort();
        println!("\n{}", "Variables:".bold());
        for (key, value) in vars {
            println!("  {} = {}", key.cyan(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("NODE_ENV=production").unwrap(),
            ("NODE_ENV".to_string(), "production".to_string())
        );
        assert_eq!(
            parse_key_val("OPTS=a=b").unwrap(),
            ("OPTS".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_pipeline_config_defaults_to_orchestrator() {
        assert_eq!(pipeline_config(None, None, None, vec![]), None);
    }

    #[test]
    fn test_pipeline_config_fills_missing_commands() {
        let config = pipeline_config(
            Some("cargo build".to_string()),
            None,
            None,
            vec![("RUST_LOG".to_string(), "info".to_string())],
        )
        .unwrap();

        assert_eq!(config.build_command, "cargo build");
        assert_eq!(config.test_command, PipelineConfig::default().test_command);
        assert_eq!(config.env_vars["RUST_LOG"], "info");
    }
}
