//! Report rate limiting for executions.

use std::time::{Duration, Instant};

/// Gate for progress reports from a single execution.
///
/// A report passes when either `min_interval` has elapsed since the last one
/// that passed, or the byte count grew by at least `min_bytes`.
#[derive(Debug)]
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    last_bytes: u64,
    min_interval: Duration,
    min_bytes: u64,
}

impl ProgressThrottle {
    pub const fn new(min_interval: Duration, min_bytes: u64) -> Self {
        Self {
            last_emit: None,
            last_bytes: 0,
            min_interval,
            min_bytes,
        }
    }

    /// 250ms or 1 MiB, whichever comes first
    pub const fn default_interval() -> Self {
        Self::new(Duration::from_millis(250), 1024 * 1024)
    }

    pub fn should_emit(&mut self, downloaded_bytes: u64) -> bool {
        let now = Instant::now();
        let due = match self.last_emit {
            None => true,
            Some(last) => {
                now.duration_since(last) >= self.min_interval
                    || downloaded_bytes.saturating_sub(self.last_bytes) >= self.min_bytes
            }
        };

        if due {
            self.last_emit = Some(now);
            self.last_bytes = downloaded_bytes;
        }
        due
    }

    /// Force the next check to pass.
    pub const fn reset(&mut self) {
        self.last_emit = None;
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::default_interval()
    }
}
