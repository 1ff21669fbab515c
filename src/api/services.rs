use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use http_body_util::BodyExt;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tracing::{debug, warn};

use super::{
    error::ApiError,
    models::{CancelResponse, ClearResponse, HealthResponse, SubmitRequest, SubmitResponse},
    state::AppState,
    validation,
};
use crate::tasks::{TaskEvent, TaskId};

const MAX_PAYLOAD_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Task submission endpoint (POST /api/tasks)
///
/// ## Flow:
/// 1. Require a JSON Content-Type
/// 2. Read the body and enforce the size limit
/// 3. Decode `{kind, payload, name}` and check its shape
/// 4. Hand it to the task service, which validates the payload for the kind
/// 5. Return 202 Accepted with the new task id
///
/// Unknown kinds and malformed payloads are rejected with 400 before any
/// task record exists; a saturated queue answers 503.
pub async fn submit_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    validation::require_json(&headers)?;

    let body_bytes = read_body(body).await?;
    let request: SubmitRequest = serde_json::from_slice(&body_bytes)?;
    validation::validate_submission(&request)?;

    let id = state
        .service
        .submit_raw(request.kind.trim(), request.payload, request.name)?;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { id })))
}

async fn read_body(body: axum::body::Body) -> Result<Vec<u8>, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes()
        .to_vec();

    validation::check_body_size(&data, MAX_PAYLOAD_SIZE)?;
    Ok(data)
}

/// All tasks, newest first (GET /api/tasks)
pub async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.list_all())
}

/// One task snapshot (GET /api/tasks/{id})
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .service
        .get(TaskId(id))
        .ok_or_else(|| ApiError::NotFound(format!("task {id}")))?;

    Ok((StatusCode::OK, Json(snapshot)))
}

/// Cancel a pending or running task (POST /api/tasks/{id}/cancel)
///
/// Cancelling a finished or unknown task is not an error; `cancelled`
/// reports whether this request changed anything.
pub async fn cancel_task(State(state): State<AppState>, Path(id): Path<u64>) -> impl IntoResponse {
    let cancelled = state.service.cancel(TaskId(id));
    Json(CancelResponse { cancelled })
}

/// Drop finished tasks (DELETE /api/tasks/completed)
pub async fn clear_completed(State(state): State<AppState>) -> impl IntoResponse {
    let removed = state.service.clear_completed();
    Json(ClearResponse { removed })
}

/// Server-sent event stream of task changes (GET /api/events)
///
/// Event names are `task-update`, `task-list-update` and `task-progress`. A
/// subscriber that falls behind receives an `error` event with the number of
/// skipped events and keeps streaming.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut receiver = state.events.subscribe();
    let shutdown = state.shutdown.clone();
    let (tx, rx) = mpsc::channel::<Result<SseEvent, Infallible>>(16);

    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                received = receiver.recv() => match received {
                    Ok(event) => match sse_event(&event) {
                        Some(frame) => frame,
                        None => continue,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "SSE client lagged");
                        SseEvent::default()
                            .event("error")
                            .data(format!(r#"{{"error":"lagged","skipped":{}}}"#, skipped))
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.cancelled() => break,
            };
            if tx.send(Ok(frame)).await.is_err() {
                debug!("SSE client disconnected");
                break;
            }
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

fn sse_event(event: &TaskEvent) -> Option<SseEvent> {
    let data = match event {
        TaskEvent::TaskUpdate(task) => serde_json::to_string(task),
        TaskEvent::TaskListUpdate(tasks) => serde_json::to_string(tasks),
        TaskEvent::TaskProgress(progress) => serde_json::to_string(progress),
    };
    match data {
        Ok(json_data) => Some(SseEvent::default().event(event.name()).data(json_data)),
        Err(e) => {
            warn!(event = event.name(), error = %e, "Failed to serialize event");
            None
        }
    }
}

/// Health check endpoint (GET /health)
///
/// Reports 503 once the task service has begun shutting down.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let shutting_down = state.service.is_shutting_down();
    let (status_code, status) = if shutting_down {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "healthy")
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        tasks: state.service.list_all().len(),
        subscribers: state.events.subscriber_count(),
        metrics: state.service.metrics(),
    };

    (status_code, Json(response))
}
