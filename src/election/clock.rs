use std::fmt;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of the wall-clock timestamps written into lock records.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock derived from the tokio monotonic clock.
///
/// Anchored to the system time once at construction and then advanced by
/// `tokio::time::Instant`, so it never jumps backwards and follows paused
/// tokio time in tests.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin_wall: DateTime<Utc>,
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin_wall: Utc::now(),
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_default();
        self.origin_wall + elapsed
    }
}
