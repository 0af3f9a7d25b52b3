//! Wall-clock source for sample timestamps and window boundaries.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of UNIX time in whole seconds.
pub trait Clock: Send + Sync {
    /// Current UNIX time in seconds.
    fn now(&self) -> i64;
}

/// System clock via `chrono`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually advanced clock for tests and replay.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    seconds: Arc<AtomicI64>,
}

impl ManualClock {
    /// Start at the given UNIX second.
    pub fn new(start: i64) -> Self {
        Self {
            seconds: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, seconds: i64) {
        self.seconds.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, seconds: i64) {
        self.seconds.store(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.seconds.load(Ordering::SeqCst)
    }
}
