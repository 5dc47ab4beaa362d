//! Pipeline-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use conveyor_core::domain::execution::Execution;
use conveyor_core::domain::pipeline::Pipeline;
use conveyor_core::dto::pipeline::CreatePipeline;
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Management
    // =============================================================================

    /// Create a new pipeline
    ///
    /// # Example
    /// ```no_run
    /// # use conveyor_client::OrchestratorClient;
    /// # use conveyor_core::dto::pipeline::CreatePipeline;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let pipeline = client.create_pipeline(CreatePipeline {
    ///     name: "web".to_string(),
    ///     description: None,
    ///     repository: "https://example.com/web.git".to_string(),
    ///     default_branch: None,
    ///     environments: vec![],
    ///     config: None,
    /// }).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_pipeline(&self, req: CreatePipeline) -> Result<Pipeline> {
        self.post("/pipeline/create", Some(&req)).await
    }

    /// List all pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        self.get("/pipeline/list").await
    }

    /// Get a pipeline by ID
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        self.get(&format!("/pipeline/{}", pipeline_id)).await
    }

    /// Delete a pipeline and its execution history
    pub async fn delete_pipeline(&self, pipeline_id: Uuid) -> Result<()> {
        self.delete(&format!("/pipeline/{}", pipeline_id)).await
    }

    /// List executions of a pipeline, newest first
    pub async fn list_pipeline_executions(&self, pipeline_id: Uuid) -> Result<Vec<Execution>> {
        self.get(&format!("/pipeline/{}/executions", pipeline_id))
            .await
    }
}
