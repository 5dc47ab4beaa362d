//! Pipeline Repository
//!
//! Handles all database operations related to pipelines.

use conveyor_core::domain::pipeline::{DEFAULT_BRANCH, Environment, Pipeline, PipelineConfig};
use conveyor_core::dto::pipeline::CreatePipeline;
use sqlx::PgPool;
use sqlx::types::Json;
use std::collections::HashMap;
use uuid::Uuid;

/// Create a new pipeline in the database
pub async fn create(pool: &PgPool, req: CreatePipeline) -> Result<Pipeline, sqlx::Error> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let pipeline = Pipeline {
        id,
        name: req.name,
        description: req.description,
        repository: req.repository,
        default_branch: req
            .default_branch
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        environments: req.environments,
        created_at: now,
        updated_at: now,
        config: req.config.unwrap_or_default(),
    };

    sqlx::query(
        r#"
        INSERT INTO pipelines (
            id, name, description, repository, default_branch, environments,
            build_command, test_command, deploy_command, env_vars,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(id)
    .bind(&pipeline.name)
    .bind(&pipeline.description)
    .bind(&pipeline.repository)
    .bind(&pipeline.default_branch)
    .bind(environment_names(&pipeline.environments))
    .bind(&pipeline.config.build_command)
    .bind(&pipeline.config.test_command)
    .bind(&pipeline.config.deploy_command)
    .bind(Json(&pipeline.config.env_vars))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(pipeline)
}

/// Find a pipeline by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, name, description, repository, default_branch, environments,
               build_command, test_command, deploy_command, env_vars,
               created_at, updated_at
        FROM pipelines
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Pipeline::try_from).transpose()
}

/// List all pipelines
pub async fn list_all(pool: &PgPool) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, name, description, repository, default_branch, environments,
               build_command, test_command, deploy_command, env_vars,
               created_at, updated_at
        FROM pipelines
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Pipeline::try_from).collect()
}

/// Delete a pipeline by ID, together with its executions
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pipelines WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

fn environment_names(environments: &[Environment]) -> Vec<String> {
    environments.iter().map(|e| e.as_str().to_string()).collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    repository: String,
    default_branch: String,
    environments: Vec<String>,
    build_command: String,
    test_command: String,
    deploy_command: String,
    env_vars: Json<HashMap<String, String>>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<PipelineRow> for Pipeline {
    type Error = sqlx::Error;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        let environments = row
            .environments
            .iter()
            .map(|name| name.parse::<Environment>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(Pipeline {
            id: row.id,
            name: row.name,
            description: row.description,
            repository: row.repository,
            default_branch: row.default_branch,
            environments,
            created_at: row.created_at,
            updated_at: row.updated_at,
            config: PipelineConfig {
                build_command: row.build_command,
                test_command: row.test_command,
                deploy_command: row.deploy_command,
                env_vars: row.env_vars.0,
            },
        })
    }
}
