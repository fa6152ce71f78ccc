//! Execution engine seam
//!
//! The scheduler treats a download as an opaque, long-running operation: it
//! hands an [`Executor`] a request, a [`ProgressSink`] and a cancellation
//! token, and gets back either the artifact or an [`ExecutionFailure`].
//! Wall-clock timeouts are enforced by the scheduler around `run`.

mod http;

pub use http::{ClientError, HttpConfig, HttpExecutor};

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressSink;
use crate::task::{ErrorKind, TaskFailure, TaskId, TaskResult};

/// Limits applied to one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    pub max_file_size: u64,
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task_id: TaskId,
    pub source_url: String,
    /// Directory owned by this task; the artifact must be written inside it
    pub dest_dir: PathBuf,
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub checksum: String,
}

impl From<ExecutionOutput> for TaskResult {
    fn from(output: ExecutionOutput) -> Self {
        TaskResult {
            file_path: output.file_path.to_string_lossy().into_owned(),
            size_bytes: output.size_bytes,
            checksum: output.checksum,
        }
    }
}

/// Terminal failure of an execution, recorded on the task as data
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ExecutionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutionError, message)
    }

    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "execution canceled")
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("download exceeded timeout of {}s", limit.as_secs()),
        )
    }
}

impl From<ExecutionFailure> for TaskFailure {
    fn from(failure: ExecutionFailure) -> Self {
        TaskFailure::new(failure.kind, failure.message)
    }
}

/// Runs one download.
///
/// Implementations should return promptly once `cancel` fires and report
/// progress through `progress`; an `Err` from `progress.report` means the
/// size ceiling was crossed and must be returned as is.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(
        &self,
        request: ExecutionRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionFailure>;

    /// Whether `run` honors `cancel`. Running tasks of an engine that
    /// returns false cannot be canceled.
    fn supports_cancellation(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_into_result() {
        let output = ExecutionOutput {
            file_path: PathBuf::from("/downloads/abc/video.mp4"),
            size_bytes: 42,
            checksum: "sha256:00".to_string(),
        };

        let result: TaskResult = output.into();
        assert_eq!(result.file_path, "/downloads/abc/video.mp4");
        assert_eq!(result.size_bytes, 42);
    }

    #[test]
    fn test_failure_display() {
        let failure = ExecutionFailure::timeout(Duration::from_secs(5));
        assert_eq!(failure.to_string(), "timeout: download exceeded timeout of 5s");

        let failure: TaskFailure = ExecutionFailure::execution("HTTP 404").into();
        assert_eq!(failure.kind, ErrorKind::ExecutionError);
    }
}
