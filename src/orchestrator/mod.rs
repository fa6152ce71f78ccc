//! Task orchestrator
//!
//! The only entry point for external callers. It validates input, writes new
//! tasks to the store, feeds the scheduler, and exposes status queries.
//! Compare-and-set conflicts are retried here and never reach the caller.

mod error;

pub use error::{Error, Result};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::callback::{CallbackDispatcher, HttpNotifier, Notifier, RetryPolicy};
use crate::config::Config;
use crate::executor::{Executor, HttpConfig, HttpExecutor, Limits};
use crate::observability::{Metrics, MetricsSnapshot};
use crate::scheduler::{Scheduler, SchedulerConfig, remove_artifacts};
use crate::store::{FjallTaskStore, Page, StoreError, TaskFilter, TaskPage, TaskStore};
use crate::task::{CallbackStatus, ErrorKind, Task, TaskFailure, TaskId, TaskPatch, TaskState};

/// Attempts at re-reading a task whose state moved under a cancel
const CANCEL_RACE_RETRIES: usize = 50;
const CANCEL_RACE_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub scheduler: SchedulerConfig,
    pub retry: RetryPolicy,
    /// How long `shutdown` waits for in-flight callback deliveries
    pub callback_drain: Duration,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        let downloads = &config.downloads;
        Self {
            scheduler: SchedulerConfig {
                workers: downloads.max_concurrent_downloads,
                limits: Limits {
                    timeout: downloads.download_timeout(),
                    max_file_size: downloads.max_file_size.as_u64(),
                },
                download_dir: downloads.download_dir.clone(),
                cancel_grace: downloads.cancel_grace(),
                progress_flush_interval: downloads.progress_flush_interval(),
            },
            retry: RetryPolicy {
                max_retries: config.callback.max_retries,
                base_delay: Duration::from_millis(config.callback.backoff_base_ms),
                max_delay: Duration::from_millis(config.callback.backoff_max_ms),
            },
            callback_drain: config.callback.shutdown_grace(),
            default_page_size: config.api.default_page_size,
            max_page_size: config.api.max_page_size,
        }
    }
}

/// Result of `health()`
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub queue_depth: usize,
    pub active_workers: usize,
    pub store_reachable: bool,
    pub metrics: MetricsSnapshot,
}

/// What `cancel_or_delete` did
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Pending task canceled before any worker claimed it
    Canceled(Task),
    /// Running task asked to stop; the worker records `canceled`
    CancelRequested(Task),
    /// Terminal task and its artifacts removed
    Deleted(Task),
}

impl Disposition {
    pub fn action(&self) -> &'static str {
        match self {
            Disposition::Canceled(_) => "canceled",
            Disposition::CancelRequested(_) => "cancel_requested",
            Disposition::Deleted(_) => "deleted",
        }
    }

    pub fn task(&self) -> &Task {
        match self {
            Disposition::Canceled(task)
            | Disposition::CancelRequested(task)
            | Disposition::Deleted(task) => task,
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    scheduler: Scheduler,
    metrics: Arc<Metrics>,
    callback_drain: Duration,
    default_page_size: usize,
    max_page_size: usize,
    started: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let dispatcher = Arc::new(CallbackDispatcher::new(
            store.clone(),
            notifier,
            config.retry,
            metrics.clone(),
        ));
        let scheduler = Scheduler::new(
            config.scheduler,
            store.clone(),
            executor,
            dispatcher,
            metrics.clone(),
        );

        Self {
            store,
            scheduler,
            metrics,
            callback_drain: config.callback_drain,
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
            started: AtomicBool::new(false),
        }
    }

    /// Wire the default collaborators: Fjall store, HTTP executor and HTTP
    /// notifier.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = FjallTaskStore::open(&config.server.store_path)
            .map_err(|e| Error::Internal(format!("failed to open task store: {e}")))?;

        let executor = HttpExecutor::new(HttpConfig {
            user_agent: config.downloads.user_agent.clone(),
            proxy: config.downloads.proxy.clone(),
            ..HttpConfig::default()
        })
        .map_err(|e| Error::Internal(e.to_string()))?;

        let notifier = HttpNotifier::new(config.callback.timeout(), &config.downloads.user_agent)
            .map_err(|e| Error::Internal(format!("failed to build callback client: {e}")))?;

        Ok(Self::new(
            OrchestratorConfig::from_config(config),
            Arc::new(store),
            Arc::new(executor),
            Arc::new(notifier),
        ))
    }

    /// Recover tasks left over from a previous run and start the workers.
    ///
    /// Finished tasks whose callback never went through are delivered again.
    /// Tasks found `running` were interrupted and are failed; `pending`
    /// tasks are queued again, oldest first.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Before failing interrupted runs, which dispatch their own callbacks
        self.resume_callbacks()?;

        for task in self.store.scan_state(TaskState::Running)? {
            let failure = TaskFailure::new(ErrorKind::ExecutionError, "interrupted by restart");
            match self
                .store
                .update(&task.id, TaskState::Running, TaskPatch::fail(failure))
            {
                Ok(task) => {
                    warn!(task_id = %task.id, "Failed task interrupted by restart");
                    self.metrics.task_failed();
                    if let Err(e) = remove_artifacts(&self.scheduler.artifact_dir(&task.id)).await {
                        warn!(task_id = %task.id, error = %e, "Failed to remove artifacts");
                    }
                    if task.callback_url.is_some() {
                        self.scheduler.dispatcher().dispatch(task);
                    }
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let pending = self.store.scan_state(TaskState::Pending)?;
        if !pending.is_empty() {
            info!(count = pending.len(), "Re-queuing pending tasks");
        }
        for task in pending {
            self.scheduler.enqueue(task.id);
        }

        self.scheduler.start();
        Ok(())
    }

    /// Stop the workers, then give in-flight callback deliveries
    /// `callback_drain` to finish. Unfinished ones resume on the next start.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;

        let dispatcher = self.scheduler.dispatcher();
        if !dispatcher.drain(self.callback_drain).await {
            warn!(
                in_flight = dispatcher.in_flight(),
                "Callback deliveries still in flight at shutdown"
            );
        }
    }

    fn resume_callbacks(&self) -> Result<()> {
        let dispatcher = self.scheduler.dispatcher();
        for state in [TaskState::Completed, TaskState::Failed] {
            for task in self.store.scan_state(state)? {
                let undelivered = task
                    .callback
                    .as_ref()
                    .is_none_or(|record| record.status == CallbackStatus::Retrying);
                if task.callback_url.is_some() && undelivered {
                    info!(task_id = %task.id, "Resuming callback delivery");
                    dispatcher.dispatch(task);
                }
            }
        }
        Ok(())
    }

    /// Create a pending task and queue it.
    pub fn submit(&self, source_url: &str, callback_url: Option<&str>) -> Result<TaskId> {
        let source_url = validate_url("source_url", source_url)?;
        let callback_url = callback_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| validate_url("callback_url", url))
            .transpose()?;

        let task = Task::new(source_url, callback_url);
        let id = self.store.create(&task)?;
        self.metrics.task_submitted();
        self.scheduler.enqueue(id);

        info!(task_id = %id, url = %task.source_url, "Task submitted");
        Ok(id)
    }

    pub fn get_status(&self, id: &TaskId) -> Result<Task> {
        Ok(self.store.get(id)?)
    }

    /// Newest first. `page` defaults to the first page of the default size.
    pub fn list_tasks(&self, filter: &TaskFilter, page: Option<Page>) -> Result<TaskPage> {
        let page = page.unwrap_or_else(|| Page::new(1, self.default_page_size));
        if page.page == 0 {
            return Err(Error::Validation("page must be at least 1".to_string()));
        }
        if page.page_size == 0 || page.page_size > self.max_page_size {
            return Err(Error::Validation(format!(
                "page_size must be between 1 and {}",
                self.max_page_size
            )));
        }
        if page.offset().is_none() {
            return Err(Error::Validation(format!("page {} is out of range", page.page)));
        }

        Ok(self.store.list(filter, &page)?)
    }

    /// Cancel a pending or running task.
    ///
    /// A pending task is canceled at once. A running task is asked to stop
    /// and the returned record may still read `running`.
    pub async fn cancel(&self, id: &TaskId) -> Result<Disposition> {
        for _ in 0..CANCEL_RACE_RETRIES {
            let task = self.store.get(id)?;

            match task.state {
                TaskState::Pending => {
                    match self.store.update(id, TaskState::Pending, TaskPatch::cancel()) {
                        Ok(task) => {
                            self.scheduler.dequeue(id);
                            self.metrics.task_canceled();
                            info!(task_id = %id, "Pending task canceled");
                            return Ok(Disposition::Canceled(task));
                        }
                        Err(e) if e.is_conflict() => {
                            debug!(task_id = %id, "Task claimed while canceling, re-reading");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                TaskState::Running => {
                    if !self.scheduler.supports_cancellation() {
                        return Err(Error::invalid_state(
                            *id,
                            task.state,
                            "execution engine cannot cancel running tasks",
                        ));
                    }
                    if self.scheduler.cancel_running(id) {
                        return Ok(Disposition::CancelRequested(task));
                    }
                    // Claimed but not yet registered, or about to finish
                    tokio::time::sleep(CANCEL_RACE_BACKOFF).await;
                }
                state => {
                    return Err(Error::invalid_state(*id, state, "task already finished"));
                }
            }
        }

        let task = self.store.get(id)?;
        Err(Error::invalid_state(*id, task.state, "task state kept changing"))
    }

    /// Remove a terminal task and its artifacts.
    pub async fn delete(&self, id: &TaskId) -> Result<Task> {
        let task = self.store.get(id)?;
        if !task.state.is_terminal() {
            return Err(Error::invalid_state(
                *id,
                task.state,
                "only finished tasks can be deleted",
            ));
        }

        let removed = self.store.delete(id).map_err(|e| match e {
            StoreError::InvalidState { reason, .. } => Error::invalid_state(*id, task.state, reason),
            other => other.into(),
        })?;

        let dir = self.scheduler.artifact_dir(id);
        if let Err(e) = remove_artifacts(&dir).await {
            warn!(task_id = %id, path = %dir.display(), error = %e, "Failed to remove artifacts");
        }

        info!(task_id = %id, "Task deleted");
        Ok(removed)
    }

    /// Cancel an unfinished task, delete a finished one.
    pub async fn cancel_or_delete(&self, id: &TaskId) -> Result<Disposition> {
        let task = self.store.get(id)?;
        if task.state.is_terminal() {
            self.delete(id).await.map(Disposition::Deleted)
        } else {
            self.cancel(id).await
        }
    }

    /// Submit a new task for the same source as a finished one.
    pub fn retry(&self, id: &TaskId) -> Result<TaskId> {
        let original = self.store.get(id)?;
        if !original.state.is_terminal() {
            return Err(Error::invalid_state(
                *id,
                original.state,
                "only finished tasks can be retried",
            ));
        }

        let task = Task::retry_of(&original);
        let new_id = self.store.create(&task)?;
        self.metrics.task_submitted();
        self.scheduler.enqueue(new_id);

        info!(task_id = %new_id, retry_of = %id, "Retry submitted");
        Ok(new_id)
    }

    pub fn health(&self) -> Health {
        let store_reachable = match self.store.health_check() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Task store health check failed");
                false
            }
        };

        Health {
            queue_depth: self.scheduler.queue_depth(),
            active_workers: self.scheduler.active_workers(),
            store_reachable,
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn default_page_size(&self) -> usize {
        self.default_page_size
    }

    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }
}

/// Trimmed absolute http(s) URL with a host
fn validate_url(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{field} must not be empty")));
    }

    let parsed = url::Url::parse(value)
        .map_err(|e| Error::Validation(format!("{field} is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Validation(format!(
            "{field} must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::Validation(format!("{field} must include a host")));
    }

    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert_eq!(
            validate_url("source_url", "  https://example.com/a.mp4 ").unwrap(),
            "https://example.com/a.mp4"
        );
        assert!(matches!(validate_url("source_url", ""), Err(Error::Validation(_))));
        assert!(matches!(validate_url("source_url", "   "), Err(Error::Validation(_))));
        assert!(matches!(
            validate_url("source_url", "ftp://example.com/a"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            validate_url("source_url", "example.com/a"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_disposition_action() {
        let task = Task::new("https://example.com/a", None);
        assert_eq!(Disposition::Canceled(task.clone()).action(), "canceled");
        assert_eq!(Disposition::Deleted(task.clone()).action(), "deleted");
        assert_eq!(Disposition::CancelRequested(task).task().state, TaskState::Pending);
    }
}
