//! Execution-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use conveyor_core::domain::execution::Execution;
use conveyor_core::dto::execution::{
    CancelOutcome, ExecutionStatusView, LogSnapshot, TriggerExecution, TriggeredExecution,
};
use conveyor_core::dto::health::HealthReport;
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Execution Lifecycle
    // =============================================================================

    /// Trigger a new execution of a pipeline
    ///
    /// Returns as soon as the execution is accepted; it runs in the background.
    ///
    /// # Example
    /// ```no_run
    /// # use conveyor_client::OrchestratorClient;
    /// # use conveyor_core::dto::execution::TriggerExecution;
    /// # use uuid::Uuid;
    /// # async fn example(pipeline_id: Uuid) -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let triggered = client.trigger_execution(TriggerExecution {
    ///     pipeline_id,
    ///     branch: Some("release".to_string()),
    ///     environment: "staging".to_string(),
    /// }).await?;
    /// println!("Execution {}", triggered.execution_id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn trigger_execution(&self, req: TriggerExecution) -> Result<TriggeredExecution> {
        self.post("/execution/trigger", Some(&req)).await
    }

    /// Request cancellation of an execution
    ///
    /// `cancelled` is false when the execution is not in flight on the
    /// orchestrator (already finished, or never existed).
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<CancelOutcome> {
        self.post::<(), _>(&format!("/execution/{}/cancel", execution_id), None)
            .await
    }

    // =============================================================================
    // Execution Queries
    // =============================================================================

    /// Get the full execution record
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution> {
        self.get(&format!("/execution/{}", execution_id)).await
    }

    /// Get status and timing of an execution
    pub async fn get_execution_status(&self, execution_id: Uuid) -> Result<ExecutionStatusView> {
        self.get(&format!("/execution/{}/status", execution_id))
            .await
    }

    /// Get the logs persisted so far
    pub async fn get_execution_logs(&self, execution_id: Uuid) -> Result<LogSnapshot> {
        self.get(&format!("/execution/{}/logs", execution_id))
            .await
    }

    /// Check that the orchestrator is up
    pub async fn health(&self) -> Result<HealthReport> {
        self.get("/health").await
    }
}
