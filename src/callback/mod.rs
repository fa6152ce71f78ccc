//! Terminal-state notifications
//!
//! The [`CallbackDispatcher`] POSTs a [`CallbackPayload`] to a finished
//! task's `callback_url`, retrying with capped exponential backoff. Each
//! attempt is recorded on the task's `callback` field. Running out of
//! attempts is reported as [`DeliveryError::Exhausted`] and never changes
//! the task's state.

mod dispatcher;
mod notifier;
mod payload;

pub use dispatcher::{CallbackDispatcher, DeliveryError, DeliveryOutcome, RetryPolicy};
pub use notifier::{AttemptError, HttpNotifier, Notifier};
pub use payload::CallbackPayload;
