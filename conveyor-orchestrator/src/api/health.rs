//! Health Check API Handler
//!
//! Liveness endpoint for monitoring; also reports how many executions are in flight.

use axum::{Json, extract::State};
use conveyor_core::dto::health::HealthReport;

use crate::api::AppState;

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok".to_string(),
        running_executions: state.engine.registry().len(),
    })
}
