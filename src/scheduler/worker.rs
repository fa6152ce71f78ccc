use std::collections::hash_map::Entry;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Shared, remove_artifacts};
use crate::executor::{ExecutionFailure, ExecutionOutput, ExecutionRequest};
use crate::progress::{ProgressSink, size_exceeded};
use crate::store::StoreError;
use crate::task::{ErrorKind, Task, TaskId, TaskPatch, TaskState};

/// How a claimed run ended
#[derive(Debug)]
enum Outcome {
    Completed(ExecutionOutput),
    Failed(ExecutionFailure),
    Canceled,
}

impl Outcome {
    fn into_patch(self) -> TaskPatch {
        match self {
            Outcome::Completed(output) => TaskPatch::complete(output.into()),
            Outcome::Failed(failure) => TaskPatch::fail(failure.into()),
            Outcome::Canceled => TaskPatch::cancel(),
        }
    }
}

impl Shared {
    pub(super) async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "Worker started");

        loop {
            let id = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                id = self.queue.pop() => id,
            };
            self.run_task(id).await;
        }

        debug!(worker_id, "Worker stopped");
    }

    async fn run_task(&self, id: TaskId) {
        // Registered before the claim so a cancel racing the claim finds it
        let token = match self.running().entry(id) {
            Entry::Occupied(_) => {
                debug!(task_id = %id, "Task already held by another worker, skipping");
                return;
            }
            Entry::Vacant(slot) => slot.insert(self.shutdown.child_token()).clone(),
        };

        let task = match self.store.update(&id, TaskState::Pending, TaskPatch::claim()) {
            Ok(task) => task,
            Err(e) => {
                self.running().remove(&id);
                match e {
                    StoreError::Conflict { actual, .. } => {
                        debug!(task_id = %id, state = %actual, "Task no longer pending, skipping");
                    }
                    StoreError::NotFound(_) => {
                        debug!(task_id = %id, "Task vanished before claim");
                    }
                    e => error!(task_id = %id, error = %e, "Failed to claim task"),
                }
                return;
            }
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        info!(task_id = %id, url = %task.source_url, "Task claimed");

        let outcome = self.execute(&task, &token).await;
        self.running().remove(&id);
        self.finish(id, outcome).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    async fn execute(&self, task: &Task, token: &CancellationToken) -> Outcome {
        let limits = self.config.limits;
        let sink = ProgressSink::new(task.id, self.tracker.clone(), limits.max_file_size, token.clone());
        let request = ExecutionRequest {
            task_id: task.id,
            source_url: task.source_url.clone(),
            dest_dir: self.artifact_dir(&task.id),
            limits,
        };

        let task_id = task.id;
        // A panicking executor fails its task instead of taking the worker down
        let run = AssertUnwindSafe(self.executor.run(request, sink.clone(), token.clone()))
            .catch_unwind()
            .map(move |caught| {
                caught.unwrap_or_else(|_| {
                    error!(task_id = %task_id, "Execution panicked");
                    Err(ExecutionFailure::execution("execution panicked"))
                })
            });
        tokio::pin!(run);

        let result = tokio::select! {
            result = &mut run => Some(result),
            _ = tokio::time::sleep(limits.timeout) => {
                token.cancel();
                warn!(task_id = %task.id, timeout_secs = limits.timeout.as_secs(), "Execution timed out");
                return Outcome::Failed(ExecutionFailure::timeout(limits.timeout));
            }
            _ = token.cancelled() => {
                match tokio::time::timeout(self.config.cancel_grace, &mut run).await {
                    Ok(result) => Some(result),
                    Err(_) => {
                        warn!(
                            task_id = %task.id,
                            grace_secs = self.config.cancel_grace.as_secs(),
                            "Execution ignored cancellation, abandoning it"
                        );
                        None
                    }
                }
            }
        };

        self.classify(task.id, &sink, token, result)
    }

    fn classify(
        &self,
        id: TaskId,
        sink: &ProgressSink,
        token: &CancellationToken,
        result: Option<Result<ExecutionOutput, ExecutionFailure>>,
    ) -> Outcome {
        let max_file_size = self.config.limits.max_file_size;

        if sink.size_exceeded() {
            return match result {
                Some(Err(failure)) if failure.kind == ErrorKind::SizeExceeded => Outcome::Failed(failure),
                _ => Outcome::Failed(ExecutionFailure::new(
                    ErrorKind::SizeExceeded,
                    format!("file size exceeds limit of {max_file_size} bytes"),
                )),
            };
        }

        if self.shutdown.is_cancelled() {
            return Outcome::Failed(ExecutionFailure::new(
                ErrorKind::Canceled,
                "interrupted by shutdown",
            ));
        }

        if token.is_cancelled() {
            debug!(task_id = %id, "Run stopped by cancellation");
            return Outcome::Canceled;
        }

        match result {
            Some(Ok(output)) if output.size_bytes > max_file_size => {
                Outcome::Failed(size_exceeded(output.size_bytes, max_file_size))
            }
            Some(Ok(output)) => Outcome::Completed(output),
            Some(Err(failure)) => Outcome::Failed(failure),
            None => Outcome::Canceled,
        }
    }

    /// Record the terminal state, clean up, and hand off to the dispatcher.
    async fn finish(&self, id: TaskId, outcome: Outcome) {
        self.tracker.flush_task(&id);
        let finished = self.store.update(&id, TaskState::Running, outcome.into_patch());
        self.tracker.forget(&id);

        let task = match finished {
            Ok(task) => task,
            Err(StoreError::Conflict { actual, .. }) => {
                // Someone else already finalized it; our output is discarded
                info!(task_id = %id, state = %actual, "Task left running during execution");
                self.discard_artifacts(&id).await;
                return;
            }
            Err(e) => {
                error!(task_id = %id, error = %e, "Failed to record terminal state");
                return;
            }
        };

        match task.state {
            TaskState::Completed => {
                self.metrics.task_completed();
                info!(task_id = %id, "Task completed");
            }
            TaskState::Failed => {
                self.metrics.task_failed();
                if let Some(error) = &task.error {
                    warn!(task_id = %id, kind = %error.kind, error = %error.message, "Task failed");
                }
                self.discard_artifacts(&id).await;
            }
            TaskState::Canceled => {
                self.metrics.task_canceled();
                info!(task_id = %id, "Task canceled");
                self.discard_artifacts(&id).await;
            }
            TaskState::Pending | TaskState::Running => {}
        }

        if task.callback_url.is_some() && task.state != TaskState::Canceled {
            self.dispatcher.dispatch(task);
        }
    }

    async fn discard_artifacts(&self, id: &TaskId) {
        let dir = self.artifact_dir(id);
        if let Err(e) = remove_artifacts(&dir).await {
            warn!(task_id = %id, path = %dir.display(), error = %e, "Failed to remove artifacts");
        }
    }
}
