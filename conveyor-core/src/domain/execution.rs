//! Execution domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::pipeline::Environment;

/// One attempt to run a pipeline
///
/// Structure shared between orchestrator (persists) and runner (updates).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub status: ExecutionStatus,
    pub branch: String,
    pub environment: Environment,
    pub logs: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Execution {
    /// Whole seconds between start and end, once both are known
    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(started), Some(ended)) => Some(ended.signed_duration_since(started).num_seconds()),
            _ => None,
        }
    }
}

/// Execution lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Events that drive an execution through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// The state machine picked the execution up and starts step 1
    Begin,
    /// A step exited zero and more steps remain
    StepSucceeded,
    /// Every step succeeded (or was skipped)
    Complete,
    /// A step exited non-zero or could not run
    Fail,
    /// A cancellation request was honoured
    Cancel,
}

/// Rejected lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition: {event:?} while {from}")]
pub struct TransitionError {
    pub from: ExecutionStatus,
    pub event: StatusEvent,
}

impl ExecutionStatus {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// The single authoritative transition function of the execution lifecycle
    pub fn transition(self, event: StatusEvent) -> Result<ExecutionStatus, TransitionError> {
        use ExecutionStatus::*;
        use StatusEvent::*;

        match (self, event) {
            (Pending, Begin) => Ok(Running),
            (Running, StepSucceeded) => Ok(Running),
            (Running, Complete) => Ok(Completed),
            (Running, Fail) => Ok(Failed),
            (Running, Cancel) => Ok(Cancelled),
            (from, event) => Err(TransitionError { from, event }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutionStatus::*;
    use StatusEvent::*;

    #[test]
    fn test_happy_path_transitions() {
        let status = Pending.transition(Begin).unwrap();
        assert_eq!(status, Running);
        let status = status.transition(StepSucceeded).unwrap();
        assert_eq!(status, Running);
        assert_eq!(status.transition(Complete), Ok(Completed));
        assert_eq!(status.transition(Fail), Ok(Failed));
        assert_eq!(status.transition(Cancel), Ok(Cancelled));
    }

    #[test]
    fn test_terminal_states_reject_every_event() {
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for event in [Begin, StepSucceeded, Complete, Fail, Cancel] {
                let err = terminal.transition(event).unwrap_err();
                assert_eq!(err.from, terminal);
            }
        }
    }

    #[test]
    fn test_pending_only_begins() {
        assert!(!Pending.is_terminal());
        assert!(Pending.transition(Complete).is_err());
        assert!(Pending.transition(StepSucceeded).is_err());
        assert!(Pending.transition(Cancel).is_err());
        assert!(Running.transition(Begin).is_err());
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [Pending, Running, Completed, Failed, Cancelled] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>(), Ok(status));
        }
        assert!("Succeeded".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_duration_requires_both_timestamps() {
        let started = chrono::Utc::now();
        let mut execution = Execution {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            status: Running,
            branch: "main".to_string(),
            environment: Environment::Staging,
            logs: String::new(),
            created_at: started,
            started_at: Some(started),
            ended_at: None,
        };
        assert_eq!(execution.duration_seconds(), None);

        execution.ended_at = Some(started + chrono::Duration::seconds(42));
        assert_eq!(execution.duration_seconds(), Some(42));
    }
}
