//! Service layer
//!
//! Services hold the engine's business logic: allocating workspaces, running
//! step processes, buffering logs and driving an execution to its terminal
//! status.

pub mod execution;
pub mod log_sink;
pub mod step;
pub mod workspace;

pub use execution::{ExecutionMachine, PlannedStep, plan};
pub use log_sink::LogSink;
pub use step::{OutputSink, OutputStream, RunningStep, StepCommand, StepExit, StepRunner};
pub use workspace::{Workspace, WorkspaceManager};
