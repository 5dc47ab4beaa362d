//! Error types for the execution engine

use conveyor_core::domain::execution::TransitionError;
use conveyor_core::domain::pipeline::UnknownEnvironment;
use conveyor_core::domain::step::StepKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while triggering or driving an execution
#[derive(Debug, Error)]
pub enum EngineError {
    /// Trigger referenced a pipeline the record store does not know
    #[error("pipeline {0} not found")]
    PipelineNotFound(Uuid),

    /// Trigger named an environment that is unknown or not targeted by the pipeline
    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    /// Working directory could not be created or removed
    #[error("workspace error at {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A step exited non-zero
    #[error("{step} failed with exit code {exit_code}")]
    StepFailure { step: StepKind, exit_code: i32 },

    /// A step's process could not be started or awaited
    #[error("{step} could not run: {source}")]
    Process {
        step: StepKind,
        #[source]
        source: std::io::Error,
    },

    /// A terminated process outlived the grace period and was killed
    #[error("process {pid} ignored termination for {grace:?} and was killed")]
    Cancellation { pid: u32, grace: Duration },

    /// A running handle already exists for this execution
    #[error("execution {0} already has a running handle")]
    RegistryConflict(Uuid),

    /// The whole-execution timeout elapsed
    #[error("execution timed out after {0:?}")]
    TimedOut(Duration),

    /// The record store failed
    #[error("record store error: {0:#}")]
    Store(#[from] anyhow::Error),

    /// The lifecycle rejected a status change
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<UnknownEnvironment> for EngineError {
    fn from(err: UnknownEnvironment) -> Self {
        EngineError::InvalidEnvironment(err.0)
    }
}
