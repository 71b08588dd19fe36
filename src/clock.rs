//! Session clock.
//!
//! All buffer, rebuffer, and chunk-timing values are measured against a
//! [`Clock`] instead of wall-clock time. It is built on the tokio timer, so a
//! runtime started with paused time (`#[tokio::test(start_paused = true)]`)
//! makes every session fully virtual and deterministic.

use std::time::Duration;

use tokio::time::Instant;

/// Elapsed time since a fixed epoch.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// Start a clock at the current instant.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Time since the epoch.
    pub fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Suspend for `delay`.
    pub async fn sleep(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Nanoseconds of a clock reading, as carried on the wire.
pub fn as_nanos(t: Duration) -> u64 {
    u64::try_from(t.as_nanos()).unwrap_or(u64::MAX)
}
