// src/core/policies/timestamp.rs

//! Client-side timestamp generation: monotonic microseconds since the Unix
//! epoch, attached to mutations so replays and retries keep their ordering.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::warn;

pub trait TimestampGenerator: Send + Sync + fmt::Debug {
    /// Next timestamp in microseconds, strictly greater than any previously
    /// returned by this generator.
    fn next(&self) -> i64;
}

/// Wall-clock microseconds, bumped by one whenever the clock reads the same
/// or an earlier value than the last result (clock skew, sub-microsecond
/// call rates). Drift is logged once per burst.
#[derive(Debug, Default)]
pub struct MonotonicTimestampGenerator {
    last: AtomicI64,
}

impl MonotonicTimestampGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn clock_micros() -> i64 {
        // i64 microseconds cover the clock until the year 294'000+; the
        // fallback only triggers on a pre-epoch system clock.
        chrono::Utc::now().timestamp_micros()
    }
}

impl TimestampGenerator for MonotonicTimestampGenerator {
    fn next(&self) -> i64 {
        let now = Self::clock_micros();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = if now > last {
                now
            } else {
                // Overflow protection: never wrap past i64::MAX even under
                // a runaway clock.
                match last.checked_add(1) {
                    Some(next) => next,
                    None => {
                        warn!("Timestamp generator saturated at i64::MAX");
                        return i64::MAX;
                    }
                }
            };
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}
