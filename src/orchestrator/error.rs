use thiserror::Error;

use crate::store::StoreError;
use crate::task::{TaskId, TaskState};

/// Errors surfaced to callers of the orchestrator
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {id} is {state}: {reason}")]
    InvalidState {
        id: TaskId,
        state: TaskState,
        reason: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn invalid_state(id: TaskId, state: TaskState, reason: impl Into<String>) -> Self {
        Error::InvalidState {
            id,
            state,
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Error::NotFound(id),
            // State errors are handled where the state is known
            other => Error::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
