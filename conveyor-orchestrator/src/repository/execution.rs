//! Execution Repository
//!
//! Handles all database operations related to pipeline executions.
//!
//! Status changes are conditional updates: only `pending` rows begin, and only
//! non-terminal rows receive logs or a terminal status. A terminal row is never
//! written again.

use conveyor_core::domain::execution::{Execution, ExecutionStatus};
use conveyor_core::domain::pipeline::Environment;
use sqlx::PgPool;
use uuid::Uuid;

const COLUMNS: &str = "id, pipeline_id, status, branch, environment, logs, \
                       created_at, started_at, ended_at";

/// Create a new `pending` execution
pub async fn create(
    pool: &PgPool,
    pipeline_id: Uuid,
    branch: &str,
    environment: Environment,
) -> Result<Execution, sqlx::Error> {
    let execution = Execution {
        id: Uuid::new_v4(),
        pipeline_id,
        status: ExecutionStatus::Pending,
        branch: branch.to_string(),
        environment,
        logs: String::new(),
        created_at: chrono::Utc::now(),
        started_at: None,
        ended_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO pipeline_executions (id, pipeline_id, status, branch, environment, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(execution.id)
    .bind(pipeline_id)
    .bind(execution.status.as_str())
    .bind(&execution.branch)
    .bind(environment.as_str())
    .bind(execution.created_at)
    .execute(pool)
    .await?;

    Ok(execution)
}

/// Find an execution by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Execution>, sqlx::Error> {
    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {} FROM pipeline_executions WHERE id = $1",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Execution::try_from).transpose()
}

/// Find executions of a pipeline, newest first
pub async fn find_by_pipeline(
    pool: &PgPool,
    pipeline_id: Uuid,
) -> Result<Vec<Execution>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {} FROM pipeline_executions WHERE pipeline_id = $1 ORDER BY created_at DESC",
        COLUMNS
    ))
    .bind(pipeline_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Execution::try_from).collect()
}

/// Find executions that are still `pending` or `running`, oldest first
pub async fn find_in_flight(pool: &PgPool) -> Result<Vec<Execution>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {} FROM pipeline_executions WHERE status IN ('pending', 'running') \
         ORDER BY created_at ASC",
        COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Execution::try_from).collect()
}

/// Move a `pending` execution to `running`
pub async fn mark_running(
    pool: &PgPool,
    id: Uuid,
    started_at: chrono::DateTime<chrono::Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_executions
        SET status = 'running', started_at = $1
        WHERE id = $2 AND status = 'pending'
        "#,
    )
    .bind(started_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Append a chunk to a non-terminal execution's logs in a single statement
pub async fn append_logs(pool: &PgPool, id: Uuid, chunk: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_executions
        SET logs = logs || $1
        WHERE id = $2 AND status IN ('pending', 'running')
        "#,
    )
    .bind(chunk)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Move a non-terminal execution to a terminal status, appending trailing logs
pub async fn finalize(
    pool: &PgPool,
    id: Uuid,
    status: ExecutionStatus,
    ended_at: chrono::DateTime<chrono::Utc>,
    trailing_logs: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_executions
        SET status = $1, ended_at = $2, logs = logs || $3
        WHERE id = $4 AND status IN ('pending', 'running')
        "#,
    )
    .bind(status.as_str())
    .bind(ended_at)
    .bind(trailing_logs)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: Uuid,
    pipeline_id: Uuid,
    status: String,
    branch: String,
    environment: String,
    logs: String,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = sqlx::Error;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<ExecutionStatus>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        let environment = row
            .environment
            .parse::<Environment>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(Execution {
            id: row.id,
            pipeline_id: row.pipeline_id,
            status,
            branch: row.branch,
            environment,
            logs: row.logs,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}
