//! Durable task records
//!
//! The store is the single source of truth for task state and the only
//! component written by several concurrent actors (workers, the progress
//! tracker, the callback dispatcher). All of them go through
//! [`TaskStore::update`], a compare-and-set on the task's state: an update
//! that expects `running` fails with [`StoreError::Conflict`] once the task has
//! been canceled, instead of silently overwriting it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fetchdeck::store::{FjallTaskStore, TaskStore};
//! use fetchdeck::task::{Task, TaskPatch, TaskState};
//!
//! let store = FjallTaskStore::open("data/tasks")?;
//! let id = store.create(&Task::new("https://example.com/a.mp4", None))?;
//! store.update(&id, TaskState::Pending, TaskPatch::claim())?;
//! ```

pub mod error;
mod fjall_store;
pub mod partitions;

pub use error::{Result, StoreError};
pub use fjall_store::FjallTaskStore;

use serde::Serialize;

use crate::task::{Task, TaskId, TaskPatch, TaskState};

/// Persistence backend contract
///
/// Any backend works as long as `update` is an atomic compare-and-set on the
/// record's state.
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Fails with `AlreadyExists` if the id is taken.
    fn create(&self, task: &Task) -> Result<TaskId>;

    fn get(&self, id: &TaskId) -> Result<Task>;

    /// Apply `patch` if the task is currently in `expected` state.
    fn update(&self, id: &TaskId, expected: TaskState, patch: TaskPatch) -> Result<Task>;

    /// Newest first
    fn list(&self, filter: &TaskFilter, page: &Page) -> Result<TaskPage>;

    /// All tasks in `state`, oldest first
    fn scan_state(&self, state: TaskState) -> Result<Vec<Task>>;

    /// Remove a terminal task, returning the removed record
    fn delete(&self, id: &TaskId) -> Result<Task>;

    fn health_check(&self) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
}

impl TaskFilter {
    pub fn state(state: TaskState) -> Self {
        Self { state: Some(state) }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.state.is_none_or(|state| task.state == state)
    }
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: usize,
    pub page_size: usize,
}

impl Page {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self { page, page_size }
    }

    /// Records skipped before this page; `None` if it does not fit in `usize`
    pub fn offset(&self) -> Option<usize> {
        self.page.saturating_sub(1).checked_mul(self.page_size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub tasks: Vec<Task>,
}
