//! Data Transfer Objects for the orchestrator API
//!
//! DTOs are lightweight request/response shapes exchanged between the
//! orchestrator, its client and the CLI.

pub mod execution;
pub mod health;
pub mod pipeline;
