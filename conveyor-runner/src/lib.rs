//! Conveyor execution engine
//!
//! Runs pipeline executions as a fixed sequence of external commands
//! (clone, checkout, build, test, deploy) in per-execution workspaces.
//!
//! Architecture:
//! - Store: `RecordStore` seam for pipelines and execution records
//! - Registry: in-flight executions and their cancellation handles
//! - Services: workspaces, step processes, log batching, the execution state machine
//! - Engine: trigger/cancel/status/logs entry points and orphan reconciliation

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod registry;
pub mod service;
pub mod store;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use events::{BroadcastPublisher, EventPublisher};
pub use registry::{ExecutionRegistry, RunningHandle};
pub use store::{MemoryRecordStore, RecordStore};
