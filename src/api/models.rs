//! Request and response bodies of the HTTP API.
//!
//! Task records are returned as stored (see [`crate::task::Task`]);
//! timestamps are Unix milliseconds.
//!
//! Submitting a download:
//!
//! ```json
//! {
//!   "source_url": "https://cdn.example.com/video.mp4",
//!   "callback_url": "https://client.example.com/hooks/fetchdeck"
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::observability::MetricsSnapshot;
use crate::task::{TaskId, TaskState};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitTaskRequest {
    pub source_url: String,
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskAcceptedResponse {
    pub task_id: TaskId,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_of: Option<TaskId>,
}

/// Query string of `GET /api/v1/tasks`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTasksQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    /// Filter by state; `status` is accepted as an alias
    #[serde(alias = "status")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispositionResponse {
    pub task_id: TaskId,
    /// `canceled`, `cancel_requested` or `deleted`
    pub action: String,
    pub state: TaskState,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queue_depth: usize,
    pub active_workers: usize,
    pub store_reachable: bool,
    pub metrics: MetricsSnapshot,
}
