use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{CallbackPayload, Notifier};
use crate::observability::Metrics;
use crate::store::{StoreError, TaskStore};
use crate::task::{CallbackRecord, CallbackStatus, Task, TaskId, TaskPatch, TaskState};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("callback delivery failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("task {id} is {state}, callbacks are only sent for terminal tasks")]
    NotTerminal { id: TaskId, state: TaskState },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No callback URL, or the task was canceled
    Skipped,
    Delivered { attempts: u32 },
}

/// Bounded retry schedule: `max_retries + 1` attempts in total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the `failed_attempts`-th failure (1-based): base, 2x base, 4x base, ...
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

pub struct CallbackDispatcher {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
    inflight: TaskTracker,
}

impl CallbackDispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
            metrics,
            inflight: TaskTracker::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver the terminal notification for `task`, retrying until the
    /// first 2xx response or until attempts run out.
    pub async fn deliver(&self, task: &Task) -> Result<DeliveryOutcome, DeliveryError> {
        if !task.state.is_terminal() {
            return Err(DeliveryError::NotTerminal {
                id: task.id,
                state: task.state,
            });
        }

        let Some(url) = task.callback_url.as_deref() else {
            return Ok(DeliveryOutcome::Skipped);
        };
        if task.state == TaskState::Canceled {
            return Ok(DeliveryOutcome::Skipped);
        }

        let payload = CallbackPayload::from(task);
        let max_attempts = self.policy.max_attempts();
        // Resume the count of a delivery interrupted by a restart
        let mut attempts = match &task.callback {
            Some(record) if record.status == CallbackStatus::Retrying => record.attempts,
            _ => 0,
        };

        loop {
            attempts += 1;

            match self.notifier.notify(url, &payload).await {
                Ok(()) => {
                    self.record(task, attempts, CallbackStatus::Delivered, None);
                    self.metrics.callback_delivered();
                    info!(task_id = %task.id, attempts, "Callback delivered");
                    return Ok(DeliveryOutcome::Delivered { attempts });
                }
                Err(e) => {
                    let last_error = e.to_string();

                    if attempts >= max_attempts {
                        self.record(task, attempts, CallbackStatus::Failed, Some(last_error.clone()));
                        self.metrics.callback_failed();
                        warn!(
                            task_id = %task.id,
                            attempts,
                            error = %last_error,
                            "Callback delivery failed after retries"
                        );
                        return Err(DeliveryError::Exhausted {
                            attempts,
                            last_error,
                        });
                    }

                    self.record(task, attempts, CallbackStatus::Retrying, Some(last_error.clone()));
                    let backoff = self.policy.delay(attempts);
                    warn!(
                        task_id = %task.id,
                        attempts,
                        error = %last_error,
                        backoff_ms = backoff.as_millis() as u64,
                        "Callback attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Deliver in the background. The outcome is only logged and recorded.
    pub fn dispatch(self: &Arc<Self>, task: Task) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        self.inflight.spawn(async move {
            match dispatcher.deliver(&task).await {
                Ok(DeliveryOutcome::Skipped) => {
                    debug!(task_id = %task.id, "No callback to deliver");
                }
                Ok(DeliveryOutcome::Delivered { .. }) | Err(DeliveryError::Exhausted { .. }) => {}
                Err(e) => warn!(task_id = %task.id, error = %e, "Callback not delivered"),
            }
        })
    }

    /// Deliveries dispatched and not yet finished
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Wait up to `grace` for background deliveries. Returns false if some
    /// were still running when the grace period ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.inflight.close();
        let drained = tokio::time::timeout(grace, self.inflight.wait())
            .await
            .is_ok();
        self.inflight.reopen();
        drained
    }

    /// Write the attempt count on the task record; a failed write is logged
    /// and does not stop delivery.
    fn record(&self, task: &Task, attempts: u32, status: CallbackStatus, last_error: Option<String>) {
        let record = CallbackRecord {
            attempts,
            status,
            last_error,
            last_attempt_at: Utc::now(),
        };

        if let Err(e) = self
            .store
            .update(&task.id, task.state, TaskPatch::callback(record))
        {
            warn!(task_id = %task.id, attempts, error = %e, "Failed to record callback attempt");
        }
    }
}
