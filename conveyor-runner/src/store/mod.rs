//! Record store seam
//!
//! The engine reads pipeline definitions from, and writes execution status,
//! timestamps and logs to, a durable record store. The orchestrator backs this
//! with PostgreSQL; tests and embedders can use [`MemoryRecordStore`].
//!
//! Every mutating operation is conditional on the row's current status so the
//! store itself never lets a terminal execution change again.

mod memory;

pub use memory::MemoryRecordStore;

use anyhow::Result;
use async_trait::async_trait;
use conveyor_core::domain::execution::{Execution, ExecutionStatus};
use conveyor_core::domain::pipeline::{Environment, Pipeline};
use uuid::Uuid;

/// Durable storage for pipelines and executions
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Looks up a pipeline definition
    async fn find_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>>;

    /// Creates a new execution in `pending` with a fresh id
    async fn create_execution(
        &self,
        pipeline_id: Uuid,
        branch: &str,
        environment: Environment,
    ) -> Result<Execution>;

    /// Looks up an execution
    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>>;

    /// Lists executions that are still `pending` or `running`
    async fn list_in_flight(&self) -> Result<Vec<Execution>>;

    /// Moves a `pending` execution to `running`
    ///
    /// Returns false if the execution was not pending.
    async fn begin_execution(
        &self,
        id: Uuid,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool>;

    /// Atomically appends `chunk` to a non-terminal execution's logs
    ///
    /// Returns false if the execution is missing or already terminal.
    async fn append_logs(&self, id: Uuid, chunk: &str) -> Result<bool>;

    /// Moves a non-terminal execution to the terminal `status`
    ///
    /// `trailing_logs` is appended in the same write, so it is the last
    /// content the execution's logs ever receive. Returns false if the
    /// execution was already terminal.
    async fn finalize_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        ended_at: chrono::DateTime<chrono::Utc>,
        trailing_logs: &str,
    ) -> Result<bool>;
}
