use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::ProgressTracker;
use crate::executor::ExecutionFailure;
use crate::task::{ErrorKind, TaskId};

/// Progress callback handed to a running execution.
///
/// Besides forwarding samples to the tracker, the sink enforces the size
/// ceiling: a sample above `max_file_size` stops the execution through its
/// cancellation token and marks the run as size-exceeded.
#[derive(Clone)]
pub struct ProgressSink {
    task_id: TaskId,
    tracker: ProgressTracker,
    max_file_size: u64,
    cancel: CancellationToken,
    size_exceeded: Arc<AtomicBool>,
}

impl ProgressSink {
    pub fn new(
        task_id: TaskId,
        tracker: ProgressTracker,
        max_file_size: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            tracker,
            max_file_size,
            cancel,
            size_exceeded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Report a sample.
    ///
    /// Returns an error once the ceiling is crossed; the execution should
    /// stop and return it.
    pub fn report(&self, downloaded_bytes: u64, total_bytes: Option<u64>) -> Result<(), ExecutionFailure> {
        let observed = downloaded_bytes.max(total_bytes.unwrap_or(0));
        if observed > self.max_file_size {
            if !self.size_exceeded.swap(true, Ordering::SeqCst) {
                warn!(
                    task_id = %self.task_id,
                    observed,
                    max_file_size = self.max_file_size,
                    "Size ceiling exceeded, stopping execution"
                );
                self.cancel.cancel();
            }
            return Err(size_exceeded(observed, self.max_file_size));
        }

        self.tracker.report(self.task_id, downloaded_bytes, total_bytes);
        Ok(())
    }

    pub fn size_exceeded(&self) -> bool {
        self.size_exceeded.load(Ordering::SeqCst)
    }
}

pub(crate) fn size_exceeded(observed: u64, max_file_size: u64) -> ExecutionFailure {
    ExecutionFailure::new(
        ErrorKind::SizeExceeded,
        format!("file size {observed} bytes exceeds limit of {max_file_size} bytes"),
    )
}
