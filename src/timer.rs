//! Periodic tick scheduling for the update loop.
//!
//! The engine keeps a single [`Ticker`]. Each update pass asks it how long the
//! readiness poll may block before the next tick is due, and fires the tick
//! once the interval has elapsed.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub(crate) struct Ticker {
    interval: Duration,
    last: Instant,
}

impl Ticker {
    pub(crate) fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last: now,
        }
    }

    pub(crate) fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Time left until the next tick is due, zero if it already is.
    pub(crate) fn remaining(&self, now: Instant) -> Duration {
        (self.last + self.interval).saturating_duration_since(now)
    }

    /// Returns `true` and restarts the interval when a tick is due.
    pub(crate) fn fire_expired(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last) < self.interval {
            return false;
        }

        self.last = now;
        true
    }
}

/// Wall-clock seconds since the Unix epoch.
pub(crate) fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
