use thiserror::Error;

use crate::task::{TaskId, TaskState, TransitionError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task already exists: {0}")]
    AlreadyExists(TaskId),

    /// Compare-and-set lost: the task is no longer in the expected state
    #[error("Task {id} is {actual}, expected {expected}")]
    Conflict {
        id: TaskId,
        expected: TaskState,
        actual: TaskState,
    },

    #[error("Invalid state for task {id}: {reason}")]
    InvalidState { id: TaskId, reason: String },

    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn transition(id: TaskId, err: TransitionError) -> Self {
        StoreError::InvalidState {
            id,
            reason: err.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
