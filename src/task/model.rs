use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::state::{TaskState, TransitionError};

/// Task identifier
///
/// UUIDv7, so ids sort by creation time. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Download progress as persisted in the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub percent: f64,
}

impl Progress {
    /// Build progress from a raw sample.
    ///
    /// A total smaller than what was already downloaded is raised to the
    /// downloaded count, so `downloaded_bytes <= total_bytes` always holds.
    pub fn from_sample(downloaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        let total_bytes = total_bytes.map(|total| total.max(downloaded_bytes));
        let percent = match total_bytes {
            Some(0) | None => 0.0,
            Some(total) => (downloaded_bytes as f64 / total as f64 * 100.0).min(100.0),
        };

        Self {
            downloaded_bytes,
            total_bytes,
            percent,
        }
    }

    /// Merge a newer sample into this one.
    ///
    /// Returns false (and leaves `self` untouched) when the sample is stale.
    /// Percent never goes down even if the reported total grows.
    pub fn advance(&mut self, next: Progress) -> bool {
        if next.downloaded_bytes < self.downloaded_bytes {
            return false;
        }

        let total_bytes = next.total_bytes.or(self.total_bytes);
        let mut merged = Progress::from_sample(next.downloaded_bytes, total_bytes);
        merged.percent = merged.percent.max(self.percent);
        *self = merged;
        true
    }

    pub fn complete(size_bytes: u64) -> Self {
        Self {
            downloaded_bytes: size_bytes,
            total_bytes: Some(size_bytes),
            percent: 100.0,
        }
    }
}

/// Artifact produced by a successful execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub file_path: String,
    pub size_bytes: u64,
    pub checksum: String,
}

/// Why a task failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    SizeExceeded,
    ExecutionError,
    Canceled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::SizeExceeded => "size_exceeded",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Delivery status of the terminal callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Retrying,
    Delivered,
    Failed,
}

/// Callback bookkeeping, written only by the callback dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRecord {
    pub attempts: u32,
    pub status: CallbackStatus,
    pub last_error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_attempt_at: DateTime<Utc>,
}

/// One submitted download and its tracked lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub source_url: String,
    pub callback_url: Option<String>,
    /// Original task this one retries
    pub retry_of: Option<TaskId>,
    pub state: TaskState,
    pub progress: Progress,
    pub result: Option<TaskResult>,
    pub error: Option<TaskFailure>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub finished_at: Option<DateTime<Utc>>,
    pub callback: Option<CallbackRecord>,
}

impl Task {
    pub fn new(source_url: impl Into<String>, callback_url: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            source_url: source_url.into(),
            callback_url,
            retry_of: None,
            state: TaskState::Pending,
            progress: Progress::default(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            callback: None,
        }
    }

    /// New pending task re-running `original`
    pub fn retry_of(original: &Task) -> Self {
        let mut task = Task::new(original.source_url.clone(), original.callback_url.clone());
        task.retry_of = Some(original.id);
        task
    }

    /// Apply a patch, enforcing the state machine and the result/error invariant.
    ///
    /// On error the task is left unmodified.
    pub fn apply(&mut self, patch: TaskPatch) -> Result<(), TransitionError> {
        let next_state = patch.state.unwrap_or(self.state);

        if let Some(state) = patch.state {
            if !self.state.can_transition_to(state) {
                return Err(TransitionError::Illegal {
                    from: self.state,
                    to: state,
                });
            }
            if state == TaskState::Completed && patch.result.is_none() {
                return Err(TransitionError::MissingResult);
            }
            if state == TaskState::Failed && patch.error.is_none() {
                return Err(TransitionError::MissingError);
            }
        }

        if patch.progress.is_some() && self.state != TaskState::Running {
            return Err(TransitionError::ProgressNotRunning(self.state));
        }

        if let Some(progress) = patch.progress {
            // Stale samples are dropped, not an error
            self.progress.advance(progress);
        }

        if patch.state.is_some() {
            self.state = next_state;
            match next_state {
                TaskState::Completed => {
                    self.result = patch.result;
                    self.error = None;
                    if let Some(result) = &self.result {
                        self.progress = Progress::complete(result.size_bytes);
                    }
                }
                TaskState::Failed => {
                    self.error = patch.error;
                    self.result = None;
                }
                _ => {
                    self.result = None;
                    self.error = None;
                }
            }
        }

        if let Some(started_at) = patch.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(finished_at) = patch.finished_at {
            self.finished_at = Some(finished_at);
        }
        if let Some(callback) = patch.callback {
            self.callback = Some(callback);
        }

        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Partial update applied atomically by the task store
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub state: Option<TaskState>,
    pub progress: Option<Progress>,
    pub result: Option<TaskResult>,
    pub error: Option<TaskFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub callback: Option<CallbackRecord>,
}

impl TaskPatch {
    /// pending -> running
    pub fn claim() -> Self {
        Self {
            state: Some(TaskState::Running),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn progress(progress: Progress) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn complete(result: TaskResult) -> Self {
        Self {
            state: Some(TaskState::Completed),
            result: Some(result),
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn fail(error: TaskFailure) -> Self {
        Self {
            state: Some(TaskState::Failed),
            error: Some(error),
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn cancel() -> Self {
        Self {
            state: Some(TaskState::Canceled),
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn callback(record: CallbackRecord) -> Self {
        Self {
            callback: Some(record),
            ..Default::default()
        }
    }
}
