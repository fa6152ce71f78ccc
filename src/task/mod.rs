//! Task data model
//!
//! A [`Task`] is one submitted download. Its [`TaskState`] only moves along
//! the edges of the lifecycle state machine, and every mutation is expressed
//! as a [`TaskPatch`] so the store can apply it atomically.

mod model;
mod state;

pub use model::{
    CallbackRecord, CallbackStatus, ErrorKind, Progress, Task, TaskFailure, TaskId, TaskPatch,
    TaskResult,
};
pub use state::{TaskState, TransitionError, UnknownState};
