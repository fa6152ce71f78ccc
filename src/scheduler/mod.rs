//! Worker pool
//!
//! A fixed number of workers pull task ids from an in-memory FIFO, claim the
//! task with a `pending -> running` compare-and-set, run it through the
//! [`Executor`], and record the terminal state. The claim is what keeps two
//! workers off the same task; the queue only decides order.
//!
//! Limits enforced around each run:
//! - `download_timeout`: the execution future is dropped and the task fails
//!   with `timeout`.
//! - `max_file_size`: a progress sample over the ceiling stops the run and
//!   the task fails with `size_exceeded`.
//! - cancellation: the run gets `cancel_grace` to return once asked to stop,
//!   then it is abandoned.
//!
//! Artifacts of failed and canceled runs are removed from
//! `<download_dir>/<task_id>/`.

mod queue;
mod worker;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::callback::CallbackDispatcher;
use crate::executor::{Executor, Limits};
use crate::observability::Metrics;
use crate::progress::ProgressTracker;
use crate::store::TaskStore;
use crate::task::TaskId;

use queue::TaskQueue;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pool size (`max_concurrent_downloads`)
    pub workers: usize,
    pub limits: Limits,
    pub download_dir: PathBuf,
    pub cancel_grace: Duration,
    pub progress_flush_interval: Duration,
}

/// Handle to the worker pool. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn Executor>,
    tracker: ProgressTracker,
    dispatcher: Arc<CallbackDispatcher>,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
    queue: TaskQueue,
    active: AtomicUsize,
    running: Mutex<HashMap<TaskId, CancellationToken>>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn Executor>,
        dispatcher: Arc<CallbackDispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let tracker = ProgressTracker::new(store.clone(), metrics.clone());
        Self {
            shared: Arc::new(Shared {
                store,
                executor,
                tracker,
                dispatcher,
                metrics,
                config,
                queue: TaskQueue::default(),
                active: AtomicUsize::new(0),
                running: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn the workers and the progress flusher.
    pub fn start(&self) {
        let shared = &self.shared;
        let mut handles = shared.handles();
        if !handles.is_empty() {
            return;
        }

        handles.push(
            shared
                .tracker
                .spawn_flusher(shared.config.progress_flush_interval, shared.shutdown.clone()),
        );
        for worker_id in 0..shared.config.workers {
            let shared = Arc::clone(shared);
            handles.push(tokio::spawn(async move { shared.worker_loop(worker_id).await }));
        }

        info!(workers = shared.config.workers, "Scheduler started");
    }

    /// Stop the workers. In-flight runs are asked to stop and get the
    /// cancel grace period before being abandoned.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let handles: Vec<_> = self.shared.handles().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                debug!(error = %e, "Scheduler task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    pub fn enqueue(&self, id: TaskId) {
        if self.shared.queue.push(id) {
            debug!(task_id = %id, depth = self.queue_depth(), "Task queued");
        } else {
            debug!(task_id = %id, "Task already queued");
        }
    }

    /// Drop a task from the queue before any worker sees it.
    pub fn dequeue(&self, id: &TaskId) -> bool {
        self.shared.queue.remove(id)
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn active_workers(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn supports_cancellation(&self) -> bool {
        self.shared.executor.supports_cancellation()
    }

    /// Ask the run of `id` to stop. Returns false if no worker holds it.
    pub fn cancel_running(&self, id: &TaskId) -> bool {
        match self.shared.running().get(id) {
            Some(token) => {
                token.cancel();
                info!(task_id = %id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn artifact_dir(&self, id: &TaskId) -> PathBuf {
        self.shared.artifact_dir(id)
    }

    pub fn dispatcher(&self) -> &Arc<CallbackDispatcher> {
        &self.shared.dispatcher
    }
}

impl Shared {
    fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn running(&self) -> MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn artifact_dir(&self, id: &TaskId) -> PathBuf {
        self.config.download_dir.join(id.to_string())
    }
}

/// Remove a task's artifact directory. Missing directories are fine.
pub async fn remove_artifacts(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
