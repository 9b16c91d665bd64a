//! Time sources the processor can read "now" from.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use chrono::Utc;

/// Current time in milliseconds. Must not go backwards.
pub trait TimeSource {
    fn now_ms(&self) -> i64;
}

impl<F> TimeSource for F
where
    F: Fn() -> i64,
{
    fn now_ms(&self) -> i64 {
        self()
    }
}

/// Milliseconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now_ms(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

/// Wall-clock milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct UtcClock;

impl TimeSource for UtcClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock for tests and simulations. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<i64>>,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.set(now);
    }

    pub fn advance(&self, ms: i64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn get(&self) -> i64 {
        self.now.get()
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.get()
    }
}
