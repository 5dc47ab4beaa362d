//! Execution Service
//!
//! Business logic for triggering, cancelling and inspecting executions. Runs
//! are delegated to the execution engine; history is read from the database.

use conveyor_core::domain::execution::Execution;
use conveyor_core::dto::execution::{
    CancelOutcome, ExecutionStatusView, LogSnapshot, TriggerExecution, TriggeredExecution,
};
use conveyor_runner::{Engine, EngineError};
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{execution_repository, pipeline_repository};

/// Service error type
#[derive(Debug)]
pub enum ExecutionError {
    NotFound(Uuid),
    PipelineNotFound(Uuid),
    InvalidEnvironment(String),
    EngineError(EngineError),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for ExecutionError {
    fn from(err: sqlx::Error) -> Self {
        ExecutionError::DatabaseError(err)
    }
}

impl From<EngineError> for ExecutionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::PipelineNotFound(id) => ExecutionError::PipelineNotFound(id),
            EngineError::InvalidEnvironment(msg) => ExecutionError::InvalidEnvironment(msg),
            other => ExecutionError::EngineError(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Trigger a new execution of a pipeline
pub async fn trigger_execution(engine: &Engine, req: TriggerExecution) -> Result<TriggeredExecution> {
    let execution_id = engine
        .trigger(req.pipeline_id, req.branch.as_deref(), &req.environment)
        .await?;

    Ok(TriggeredExecution { execution_id })
}

/// Request cancellation of an execution
pub fn cancel_execution(engine: &Engine, id: Uuid) -> CancelOutcome {
    CancelOutcome {
        cancelled: engine.cancel(id),
    }
}

/// Get the full execution record
pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<Execution> {
    let execution = execution_repository::find_by_id(pool, id)
        .await?
        .ok_or(ExecutionError::NotFound(id))?;

    Ok(execution)
}

/// Get status and timing of an execution
pub async fn get_status(engine: &Engine, id: Uuid) -> Result<ExecutionStatusView> {
    engine
        .status(id)
        .await?
        .ok_or(ExecutionError::NotFound(id))
}

/// Get the persisted logs of an execution
pub async fn get_logs(engine: &Engine, id: Uuid) -> Result<LogSnapshot> {
    engine.logs(id).await?.ok_or(ExecutionError::NotFound(id))
}

/// List executions of a pipeline, newest first
pub async fn list_executions_by_pipeline(
    pool: &PgPool,
    pipeline_id: Uuid,
) -> Result<Vec<Execution>> {
    if pipeline_repository::find_by_id(pool, pipeline_id)
        .await?
        .is_none()
    {
        return Err(ExecutionError::PipelineNotFound(pipeline_id));
    }

    let executions = execution_repository::find_by_pipeline(pool, pipeline_id).await?;
    Ok(executions)
}
