//! Health DTOs

use serde::{Deserialize, Serialize};

/// Liveness report of the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub running_executions: usize,
}
