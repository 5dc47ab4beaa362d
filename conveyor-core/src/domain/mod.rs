//! Core domain types
//!
//! This module contains the core domain structures used across Conveyor crates.
//! These types represent the fundamental business entities and are shared between
//! the orchestrator (for persistence) and the runner engine (for execution).

pub mod execution;
pub mod pipeline;
pub mod step;
