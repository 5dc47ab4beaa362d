//! Execution DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::{Execution, ExecutionStatus};

/// Request to trigger a new execution of a pipeline
///
/// `environment` stays a raw string so unrecognized names reach the
/// orchestrator and are rejected there with a proper error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerExecution {
    pub pipeline_id: Uuid,
    pub branch: Option<String>,
    pub environment: String,
}

/// Response to a trigger request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredExecution {
    pub execution_id: Uuid,
}

/// Response to a cancel request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub cancelled: bool,
}

/// Status view of an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatusView {
    pub status: ExecutionStatus,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_seconds: Option<i64>,
}

impl From<&Execution> for ExecutionStatusView {
    fn from(execution: &Execution) -> Self {
        Self {
            status: execution.status,
            started_at: execution.started_at,
            ended_at: execution.ended_at,
            duration_seconds: execution.duration_seconds(),
        }
    }
}

/// Full log text of an execution at the time of the request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSnapshot {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub logs: String,
}

/// Real-time delta published while an execution progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    StatusChanged {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
    LogAppended {
        execution_id: Uuid,
        chunk: String,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            ExecutionEvent::StatusChanged { execution_id, .. }
            | ExecutionEvent::LogAppended { execution_id, .. } => *execution_id,
        }
    }
}
