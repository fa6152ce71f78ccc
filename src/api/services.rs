use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use http_body_util::BodyExt;

use super::{
    models::{
        DispositionResponse, HealthResponse, ListTasksQuery, SubmitTaskRequest,
        TaskAcceptedResponse,
    },
    state::AppState,
    utils::{list_params, parse_content_type, parse_task_id, validate_body_size},
};
use crate::api::error::ApiError;

/// Submission bodies are two URLs
const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Task submission endpoint (POST /api/v1/tasks)
///
/// Validates the JSON body, creates a pending task and queues it. Returns
/// 202 Accepted with the new task id; the download itself runs later on the
/// worker pool.
pub async fn submit_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    parse_content_type(content_type)?;

    // Decompression already handled by RequestDecompressionLayer
    let body_bytes = read_body(body).await?;
    let request: SubmitTaskRequest = serde_json::from_slice(&body_bytes)?;

    let orchestrator = &state.orchestrator;
    let task_id = orchestrator.submit(&request.source_url, request.callback_url.as_deref())?;
    let task = orchestrator.get_status(&task_id)?;

    let response = TaskAcceptedResponse {
        task_id,
        state: task.state,
        retry_of: None,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn read_body(body: axum::body::Body) -> Result<Vec<u8>, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::InvalidPayload(err.to_string()))?
        .to_bytes()
        .to_vec();

    validate_body_size(&data, MAX_PAYLOAD_SIZE)?;
    Ok(data)
}

/// Task listing endpoint (GET /api/v1/tasks?page=&page_size=&state=)
///
/// Newest first.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = &state.orchestrator;
    let (filter, page) = list_params(&query, orchestrator.default_page_size())?;
    let page = orchestrator.list_tasks(&filter, Some(page))?;

    Ok((StatusCode::OK, Json(page)))
}

/// Task status endpoint (GET /api/v1/tasks/{task_id})
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = parse_task_id(&task_id)?;
    let task = state.orchestrator.get_status(&task_id)?;

    Ok((StatusCode::OK, Json(task)))
}

/// Cancel-or-delete endpoint (DELETE /api/v1/tasks/{task_id})
///
/// Unfinished tasks are canceled, finished ones are deleted together with
/// their downloaded file.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = parse_task_id(&task_id)?;
    let disposition = state.orchestrator.cancel_or_delete(&task_id).await?;

    let response = DispositionResponse {
        task_id,
        action: disposition.action().to_string(),
        state: disposition.task().state,
    };
    Ok((StatusCode::OK, Json(response)))
}

/// Retry endpoint (POST /api/v1/tasks/{task_id}/retry)
///
/// Creates a new task for the same source; the original stays untouched.
pub async fn retry_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let original = parse_task_id(&task_id)?;
    let orchestrator = &state.orchestrator;
    let new_id = orchestrator.retry(&original)?;
    let task = orchestrator.get_status(&new_id)?;

    let response = TaskAcceptedResponse {
        task_id: new_id,
        state: task.state,
        retry_of: Some(original),
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Health check endpoint (GET /health, GET /api/v1/health)
///
/// Returns 503 Service Unavailable when the task store is unreachable.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.orchestrator.health();

    let (status_code, status) = if health.store_reachable {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue_depth: health.queue_depth,
        active_workers: health.active_workers,
        store_reachable: health.store_reachable,
        metrics: health.metrics,
    };

    (status_code, Json(response))
}
