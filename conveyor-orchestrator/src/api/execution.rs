//! Execution API Handlers
//!
//! HTTP endpoints for triggering, cancelling and following executions.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use conveyor_core::domain::execution::Execution;
use conveyor_core::dto::execution::{
    CancelOutcome, ExecutionEvent, ExecutionStatusView, LogSnapshot, TriggerExecution,
    TriggeredExecution,
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::execution_service;

// =============================================================================
// Execution Lifecycle Endpoints
// =============================================================================

/// POST /execution/trigger
/// Create an execution and start running it
pub async fn trigger_execution(
    State(state): State<AppState>,
    Json(req): Json<TriggerExecution>,
) -> ApiResult<(StatusCode, Json<TriggeredExecution>)> {
    tracing::info!(
        "Triggering pipeline {} on {}",
        req.pipeline_id,
        req.environment
    );

    let triggered = execution_service::trigger_execution(&state.engine, req).await?;

    Ok((StatusCode::ACCEPTED, Json(triggered)))
}

/// POST /execution/{id}/cancel
/// Request cancellation of an in-flight execution
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<CancelOutcome> {
    tracing::info!("Cancel requested for execution: {}", id);

    Json(execution_service::cancel_execution(&state.engine, id))
}

// =============================================================================
// Execution Query Endpoints
// =============================================================================

/// GET /execution/{id}
/// Get the full execution record
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Execution>> {
    tracing::debug!("Getting execution: {}", id);

    let execution = execution_service::get_execution(&state.pool, id).await?;

    Ok(Json(execution))
}

/// GET /execution/{id}/status
/// Get status and timing of an execution
pub async fn get_execution_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExecutionStatusView>> {
    tracing::debug!("Getting status of execution: {}", id);

    let status = execution_service::get_status(&state.engine, id).await?;

    Ok(Json(status))
}

/// GET /execution/{id}/logs
/// Get the logs persisted so far
pub async fn get_execution_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LogSnapshot>> {
    tracing::debug!("Getting logs of execution: {}", id);

    let logs = execution_service::get_logs(&state.engine, id).await?;

    Ok(Json(logs))
}

// =============================================================================
// Live Events
// =============================================================================

/// GET /execution/{id}/events
/// Server-sent events with status changes and log chunks
///
/// The first event carries the current status. The stream ends after the
/// terminal status event.
pub async fn stream_execution_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before reading the status so no transition slips in between.
    let receiver = state.events.subscribe();
    let current = execution_service::get_status(&state.engine, id).await?;

    tracing::debug!("Streaming events of execution {} ({})", id, current.status);

    let initial = ExecutionEvent::StatusChanged {
        execution_id: id,
        status: current.status,
    };
    let feed = EventFeed {
        receiver,
        execution_id: id,
        done: current.status.is_terminal(),
    };

    let events = stream::once(async move { initial })
        .chain(stream::unfold(feed, next_event))
        .map(|event| Ok(to_sse_event(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

struct EventFeed {
    receiver: broadcast::Receiver<ExecutionEvent>,
    execution_id: Uuid,
    done: bool,
}

async fn next_event(mut feed: EventFeed) -> Option<(ExecutionEvent, EventFeed)> {
    if feed.done {
        return None;
    }

    loop {
        match feed.receiver.recv().await {
            Ok(event) if event.execution_id() == feed.execution_id => {
                if let ExecutionEvent::StatusChanged { status, .. } = &event {
                    feed.done = status.is_terminal();
                }
                return Some((event, feed));
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    "Event feed of execution {} lagged, {} events skipped",
                    feed.execution_id,
                    skipped
                );
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

fn to_sse_event(event: &ExecutionEvent) -> Event {
    let name = match event {
        ExecutionEvent::StatusChanged { .. } => "status",
        ExecutionEvent::LogAppended { .. } => "log",
    };

    Event::default()
        .event(name)
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}
