use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::observability::Metrics;
use crate::store::{StoreError, TaskStore};
use crate::task::{Progress, TaskId, TaskPatch, TaskState};

/// Coalesces progress samples and writes them to the store on a cadence.
///
/// Only the latest sample per task is buffered. A sample with fewer bytes
/// than the buffered or last persisted one is dropped.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TaskStore>,
    metrics: Arc<Metrics>,
    slots: Mutex<HashMap<TaskId, Slot>>,
    /// Held from taking a sample until it is written, so `flush_task` never
    /// returns while the flusher still has that task's sample in hand
    writes: Mutex<()>,
}

#[derive(Debug, Default)]
struct Slot {
    persisted: Progress,
    pending: Option<Progress>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn TaskStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                metrics,
                slots: Mutex::new(HashMap::new()),
                writes: Mutex::new(()),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<TaskId, Slot>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.inner
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer a sample. Returns false if it was dropped as stale.
    pub fn report(&self, task_id: TaskId, downloaded_bytes: u64, total_bytes: Option<u64>) -> bool {
        let sample = Progress::from_sample(downloaded_bytes, total_bytes);
        let mut slots = self.slots();
        let slot = slots.entry(task_id).or_default();

        let mut merged = slot.pending.unwrap_or(slot.persisted);
        if !merged.advance(sample) {
            drop(slots);
            self.inner.metrics.progress_dropped();
            debug!(
                task_id = %task_id,
                downloaded_bytes,
                "Dropped stale progress sample"
            );
            return false;
        }

        slot.pending = Some(merged);
        true
    }

    /// Write every buffered sample to the store.
    pub fn flush(&self) {
        let _writing = self.write_lock();
        let batch: Vec<(TaskId, Progress)> = self
            .slots()
            .iter_mut()
            .filter_map(|(id, slot)| slot.pending.take().map(|progress| (*id, progress)))
            .collect();

        for (task_id, progress) in batch {
            self.write(task_id, progress);
        }
    }

    /// Write the buffered sample for one task, if any.
    ///
    /// Called right before a terminal transition so the last reported
    /// progress is not lost.
    pub fn flush_task(&self, task_id: &TaskId) {
        let _writing = self.write_lock();
        let pending = self
            .slots()
            .get_mut(task_id)
            .and_then(|slot| slot.pending.take());

        if let Some(progress) = pending {
            self.write(*task_id, progress);
        }
    }

    /// Stop tracking a task. Unflushed samples are discarded.
    pub fn forget(&self, task_id: &TaskId) {
        self.slots().remove(task_id);
    }

    pub fn tracked(&self) -> usize {
        self.slots().len()
    }

    fn write(&self, task_id: TaskId, progress: Progress) {
        match self
            .inner
            .store
            .update(&task_id, TaskState::Running, TaskPatch::progress(progress))
        {
            Ok(task) => {
                if let Some(slot) = self.slots().get_mut(&task_id) {
                    slot.persisted = task.progress;
                }
            }
            Err(StoreError::Conflict { actual, .. }) => {
                debug!(
                    task_id = %task_id,
                    state = %actual,
                    "Task left running, discarding progress"
                );
                self.forget(&task_id);
            }
            Err(StoreError::NotFound(_)) => {
                self.forget(&task_id);
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to persist progress");
                // Put the sample back unless a newer one arrived meanwhile
                if let Some(slot) = self.slots().get_mut(&task_id) {
                    slot.pending.get_or_insert(progress);
                }
            }
        }
    }

    /// Flush on a fixed cadence until `shutdown` fires, then flush once more.
    pub fn spawn_flusher(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => tracker.flush(),
                }
            }

            tracker.flush();
            debug!("Progress flusher stopped");
        })
    }
}
