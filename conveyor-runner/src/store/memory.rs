//! In-memory record store

use anyhow::{Result, bail};
use async_trait::async_trait;
use conveyor_core::domain::execution::{Execution, ExecutionStatus};
use conveyor_core::domain::pipeline::{Environment, Pipeline};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::RecordStore;

/// Record store kept entirely in process memory
///
/// Applies the same conditional-update rules as the PostgreSQL store.
#[derive(Default)]
pub struct MemoryRecordStore {
    pipelines: Mutex<HashMap<Uuid, Pipeline>>,
    executions: Mutex<HashMap<Uuid, Execution>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a pipeline definition
    pub fn insert_pipeline(&self, pipeline: Pipeline) {
        let mut pipelines = self.pipelines.lock().unwrap_or_else(|e| e.into_inner());
        pipelines.insert(pipeline.id, pipeline);
    }

    /// Adds or replaces an execution row as-is
    pub fn insert_execution(&self, execution: Execution) {
        let mut executions = self.executions.lock().unwrap_or_else(|e| e.into_inner());
        executions.insert(execution.id, execution);
    }

    fn with_execution<T>(&self, id: Uuid, f: impl FnOnce(&mut Execution) -> T) -> Option<T> {
        let mut executions = self.executions.lock().unwrap_or_else(|e| e.into_inner());
        executions.get_mut(&id).map(f)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>> {
        let pipelines = self.pipelines.lock().unwrap_or_else(|e| e.into_inner());
        Ok(pipelines.get(&id).cloned())
    }

    async fn create_execution(
        &self,
        pipeline_id: Uuid,
        branch: &str,
        environment: Environment,
    ) -> Result<Execution> {
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
        self.insert_execution(execution.clone());
        Ok(execution)
    }

    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        let executions = self.executions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(executions.get(&id).cloned())
    }

    async fn list_in_flight(&self) -> Result<Vec<Execution>> {
        let executions = self.executions.lock().unwrap_or_else(|e| e.into_inner());
        let mut in_flight: Vec<Execution> = executions
            .values()
            .filter(|e| !e.status.is_terminal())
            .cloned()
            .collect();
        in_flight.sort_by_key(|e| e.created_at);
        Ok(in_flight)
    }

    async fn begin_execution(
        &self,
        id: Uuid,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool> {
        let begun = self.with_execution(id, |execution| {
            if execution.status != ExecutionStatus::Pending {
                return false;
            }
            execution.status = ExecutionStatus::Running;
            execution.started_at = Some(started_at);
            true
        });
        Ok(begun.unwrap_or(false))
    }

    async fn append_logs(&self, id: Uuid, chunk: &str) -> Result<bool> {
        let appended = self.with_execution(id, |execution| {
            if execution.status.is_terminal() {
                return false;
            }
            execution.logs.push_str(chunk);
            true
        });
        Ok(appended.unwrap_or(false))
    }

    async fn finalize_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        ended_at: chrono::DateTime<chrono::Utc>,
        trailing_logs: &str,
    ) -> Result<bool> {
        if !status.is_terminal() {
            bail!("cannot finalize execution {} as {}", id, status);
        }

        let finalized = self.with_execution(id, |execution| {
            if execution.status.is_terminal() {
                return false;
            }
            execution.status = status;
            execution.ended_at = Some(ended_at);
            execution.logs.push_str(trailing_logs);
            true
        });
        Ok(finalized.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminal_rows_are_frozen() {
        let store = MemoryRecordStore::new();
        let execution = store
            .create_execution(Uuid::new_v4(), "main", Environment::Staging)
            .await
            .unwrap();

        assert!(store.begin_execution(execution.id, chrono::Utc::now()).await.unwrap());
        assert!(!store.begin_execution(execution.id, chrono::Utc::now()).await.unwrap());
        assert!(store.append_logs(execution.id, "line 1\n").await.unwrap());

        let ended = chrono::Utc::now();
        assert!(
            store
                .finalize_execution(execution.id, ExecutionStatus::Completed, ended, "done\n")
                .await
                .unwrap()
        );

        assert!(!store.append_logs(execution.id, "late\n").await.unwrap());
        assert!(
            !store
                .finalize_execution(execution.id, ExecutionStatus::Failed, chrono::Utc::now(), "x")
                .await
                .unwrap()
        );

        let stored = store.find_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.logs, "line 1\ndone\n");
        assert_eq!(stored.ended_at, Some(ended));
    }

    #[tokio::test]
    async fn test_finalize_rejects_non_terminal_status() {
        let store = MemoryRecordStore::new();
        let execution = store
            .create_execution(Uuid::new_v4(), "main", Environment::Development)
            .await
            .unwrap();

        let result = store
            .finalize_execution(execution.id, ExecutionStatus::Running, chrono::Utc::now(), "")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_in_flight_skips_terminal() {
        let store = MemoryRecordStore::new();
        let pipeline_id = Uuid::new_v4();
        let a = store
            .create_execution(pipeline_id, "main", Environment::Staging)
            .await
            .unwrap();
        let b = store
            .create_execution(pipeline_id, "main", Environment::Staging)
            .await
            .unwrap();
        store
            .finalize_execution(b.id, ExecutionStatus::Cancelled, chrono::Utc::now(), "")
            .await
            .unwrap();

        let in_flight = store.list_in_flight().await.unwrap();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].id, a.id);
    }
}
