//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories, the execution engine and the API.

pub mod execution;
pub mod pipeline;

// Re-export for convenience
pub use execution as execution_service;
pub use pipeline as pipeline_service;
