//! Pipeline DTOs

use serde::{Deserialize, Serialize};

use crate::domain::pipeline::{Environment, PipelineConfig};

/// Request to create a new pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub name: String,
    pub description: Option<String>,
    pub repository: String,
    pub default_branch: Option<String>,
    #[serde(default)]
    pub environments: Vec<Environment>,
    pub config: Option<PipelineConfig>,
}
