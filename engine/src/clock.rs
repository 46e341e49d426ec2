//! Logical clock for field timestamps.
//!
//! Field timestamps decide last-writer-wins between siblings, so every
//! value handed out must be strictly greater than the previous one from the
//! same process. The clock follows wall-clock milliseconds when it can and
//! falls back to counting when wall time stalls or goes backwards.

use crate::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Timestamp given to a record whose fields carry no timestamps at all.
pub const BASELINE_TIMESTAMP: Timestamp = 2;

/// A monotonically increasing logical clock, safe to share across threads.
#[derive(Debug)]
pub struct LogicalClock {
    last: AtomicU64,
    wall: bool,
}

impl LogicalClock {
    /// A clock that tracks wall-clock milliseconds.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
            wall: true,
        }
    }

    /// A purely counting clock starting at `counter`. Deterministic, for tests.
    pub fn with_counter(counter: Timestamp) -> Self {
        Self {
            last: AtomicU64::new(counter),
            wall: false,
        }
    }

    /// The process-wide clock.
    pub fn global() -> &'static LogicalClock {
        static GLOBAL: OnceLock<LogicalClock> = OnceLock::new();
        GLOBAL.get_or_init(LogicalClock::new)
    }

    /// Advance the clock and return the new value.
    pub fn tick(&self) -> Timestamp {
        let floor = if self.wall { wall_millis() } else { 0 };
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(1).max(floor);
            match self.last.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Make sure the next tick is later than a timestamp seen elsewhere.
    pub fn observe(&self, seen: Timestamp) {
        self.last.fetch_max(seen, Ordering::AcqRel);
    }

    /// The last value handed out.
    pub fn current(&self) -> Timestamp {
        self.last.load(Ordering::Acquire)
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

fn wall_millis() -> Timestamp {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
