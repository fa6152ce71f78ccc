use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskFailure, TaskId, TaskResult, TaskState};

/// JSON body POSTed to a task's callback URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub task_id: TaskId,
    pub state: TaskState,
    pub source_url: String,
    pub retry_of: Option<TaskId>,
    pub result: Option<TaskResult>,
    pub error: Option<TaskFailure>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Task> for CallbackPayload {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            state: task.state,
            source_url: task.source_url.clone(),
            retry_of: task.retry_of,
            result: task.result.clone(),
            error: task.error.clone(),
            finished_at: task.finished_at,
        }
    }
}
