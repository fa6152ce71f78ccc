//! API utility functions
//!
//! Pure, stateless helpers for HTTP request processing, kept out of
//! services.rs so they can be unit tested.

use crate::api::error::ApiError;
use crate::store::{Page, TaskFilter};
use crate::task::{TaskId, TaskState};

use super::models::ListTasksQuery;

/// Parses and validates Content-Type header for application/json
///
/// Accepts `application/json` with an optional charset parameter. Rejects
/// `application/jsonp`, `application/json-patch+json`, `text/json` and
/// malformed media types.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Validates that body size does not exceed the maximum allowed size
pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

pub fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid task id: {raw}")))
}

/// Turn list query parameters into a filter and page request.
///
/// Range checks on the page live in the orchestrator.
pub fn list_params(
    query: &ListTasksQuery,
    default_page_size: usize,
) -> Result<(TaskFilter, Page), ApiError> {
    let filter = match query.state.as_deref().map(str::trim) {
        None | Some("") => TaskFilter::default(),
        Some(raw) => {
            let state: TaskState = raw
                .parse()
                .map_err(|_| ApiError::InvalidPayload(format!("unknown task state: {raw}")))?;
            TaskFilter::state(state)
        }
    };

    let page = Page::new(
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(default_page_size),
    );
    Ok((filter, page))
}
