//! Conveyor Core
//!
//! Core types and abstractions for the Conveyor CI/CD system.
//!
//! This crate contains:
//! - Domain types: Core business entities (Pipeline, Execution, etc.)
//! - DTOs: Data transfer objects for the orchestrator API

pub mod domain;
pub mod dto;
