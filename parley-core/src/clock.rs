//! Time sources.
//!
//! The echo window needs a monotonic clock for its TTL and messages need a
//! wall-clock `createdAt`. Both come from one `Clock` so tests can drive them
//! together with `ManualClock`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync + 'static {
    /// Monotonic time, used for TTL arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for message timestamps.
    fn wall(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Cloning shares the same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    base_wall: DateTime<Utc>,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            base_wall: Utc::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn wall(&self) -> DateTime<Utc> {
        let offset = *self.offset.lock();
        self.base_wall + chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::zero())
    }
}
