use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::task::TaskId;

/// FIFO of pending task ids awaiting a worker.
///
/// Unbounded; its length is the queue depth reported by `health`.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    ids: Mutex<VecDeque<TaskId>>,
    notify: Notify,
}

impl TaskQueue {
    fn ids(&self) -> MutexGuard<'_, VecDeque<TaskId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `id` unless it is already waiting. Returns false for a duplicate.
    pub fn push(&self, id: TaskId) -> bool {
        let mut ids = self.ids();
        if ids.contains(&id) {
            return false;
        }
        ids.push_back(id);
        drop(ids);
        self.notify.notify_one();
        true
    }

    /// Drop a queued id. Returns false if it was not queued.
    pub fn remove(&self, id: &TaskId) -> bool {
        let mut ids = self.ids();
        match ids.iter().position(|queued| queued == id) {
            Some(index) => {
                ids.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    fn try_pop(&self) -> Option<TaskId> {
        let mut ids = self.ids();
        let id = ids.pop_front()?;
        if !ids.is_empty() {
            // Pass the wakeup on so idle workers drain the backlog
            self.notify.notify_one();
        }
        Some(id)
    }

    /// Wait for the oldest queued id.
    pub async fn pop(&self) -> TaskId {
        loop {
            if let Some(id) = self.try_pop() {
                return id;
            }
            self.notify.notified().await;
        }
    }
}
