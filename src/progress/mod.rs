//! Progress reporting
//!
//! Executions report samples through a [`ProgressSink`]. The
//! [`ProgressTracker`] keeps the latest sample per task and writes it to the
//! store every flush interval, or right before the task's terminal
//! transition. Executions that report very often can gate themselves with a
//! [`ProgressThrottle`].

mod sink;
mod throttle;
mod tracker;

pub use sink::ProgressSink;
pub(crate) use sink::size_exceeded;
pub use throttle::ProgressThrottle;
pub use tracker::ProgressTracker;
