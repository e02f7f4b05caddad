// src/core/policies/reconnection.rs

//! Reconnection policies: how long to wait between attempts to re-open
//! connections to a host that has gone away.

use rand::Rng;
use std::fmt;
use std::time::Duration;

/// A fresh schedule is created per reconnection episode; `next_delay`
/// advances it.
pub trait ReconnectionSchedule: Send {
    fn next_delay(&mut self) -> Duration;
}

/// Mints schedules. Policies are plain configuration and carry no
/// per-episode state themselves.
pub trait ReconnectionPolicy: Send + Sync + fmt::Debug {
    fn new_schedule(&self) -> Box<dyn ReconnectionSchedule>;
}

/// Fixed delay between attempts.
#[derive(Debug, Clone)]
pub struct ConstantReconnectionPolicy {
    delay: Duration,
}

impl ConstantReconnectionPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for ConstantReconnectionPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl ReconnectionPolicy for ConstantReconnectionPolicy {
    fn new_schedule(&self) -> Box<dyn ReconnectionSchedule> {
        struct Schedule(Duration);
        impl ReconnectionSchedule for Schedule {
            fn next_delay(&mut self) -> Duration {
                self.0
            }
        }
        Box::new(Schedule(self.delay))
    }
}

/// Exponential backoff with a bound, starting at `base` and doubling until
/// `max`. A small jitter keeps a wave of disconnected clients from
/// reconnecting in lockstep.
#[derive(Debug, Clone)]
pub struct ExponentialReconnectionPolicy {
    base: Duration,
    max: Duration,
}

impl ExponentialReconnectionPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl Default for ExponentialReconnectionPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10 * 60))
    }
}

impl ReconnectionPolicy for ExponentialReconnectionPolicy {
    fn new_schedule(&self) -> Box<dyn ReconnectionSchedule> {
        struct Schedule {
            base: Duration,
            max: Duration,
            attempts: u32,
        }
        impl ReconnectionSchedule for Schedule {
            fn next_delay(&mut self) -> Duration {
                let factor = 1u64 << self.attempts.min(30);
                let raw = self.base.saturating_mul(factor as u32).min(self.max);
                self.attempts = self.attempts.saturating_add(1);
                // +/-15% jitter.
                let jitter = rand::thread_rng().gen_range(0.85..1.15);
                raw.mul_f64(jitter).min(self.max)
            }
        }
        Box::new(Schedule {
            base: self.base,
            max: self.max,
            attempts: 0,
        })
    }
}
