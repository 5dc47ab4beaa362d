//! PostgreSQL-backed record store for the execution engine

use anyhow::{Context, Result};
use async_trait::async_trait;
use conveyor_core::domain::execution::{Execution, ExecutionStatus};
use conveyor_core::domain::pipeline::{Environment, Pipeline};
use conveyor_runner::RecordStore;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{execution_repository, pipeline_repository};

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>> {
        pipeline_repository::find_by_id(&self.pool, id)
            .await
            .with_context(|| format!("failed to load pipeline {}", id))
    }

    async fn create_execution(
        &self,
        pipeline_id: Uuid,
        branch: &str,
        environment: Environment,
    ) -> Result<Execution> {
        execution_repository::create(&self.pool, pipeline_id, branch, environment)
            .await
            .with_context(|| format!("failed to create execution of pipeline {}", pipeline_id))
    }

    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        execution_repository::find_by_id(&self.pool, id)
            .await
            .with_context(|| format!("failed to load execution {}", id))
    }

    async fn list_in_flight(&self) -> Result<Vec<Execution>> {
        execution_repository::find_in_flight(&self.pool)
            .await
            .context("failed to list in-flight executions")
    }

    async fn begin_execution(
        &self,
        id: Uuid,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool> {
        execution_repository::mark_running(&self.pool, id, started_at)
            .await
            .with_context(|| format!("failed to start execution {}", id))
    }

    async fn append_logs(&self, id: Uuid, chunk: &str) -> Result<bool> {
        execution_repository::append_logs(&self.pool, id, chunk)
            .await
            .with_context(|| format!("failed to append logs of execution {}", id))
    }

    async fn finalize_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        ended_at: chrono::DateTime<chrono::Utc>,
        trailing_logs: &str,
    ) -> Result<bool> {
        if !status.is_terminal() {
            anyhow::bail!("cannot finalize execution {} as {}", id, status);
        }

        execution_repository::finalize(&self.pool, id, status, ended_at, trailing_logs)
            .await
            .with_context(|| format!("failed to finalize execution {} as {}", id, status))
    }
}
