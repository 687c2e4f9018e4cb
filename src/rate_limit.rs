//! Global call-pacing gate shared by all workers of one fetch batch.

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("qps must be a finite value greater than 0, got {0}")]
pub struct InvalidRate(pub f64);

/// Enforces a maximum global request rate across any number of callers.
///
/// A single "next eligible instant" is advanced under a mutex by one
/// interval per call; the sleep itself happens outside the lock so
/// waiting callers do not serialize each other's sleeps. The limiter
/// never bursts ahead after an idle stretch: an idle limiter hands out
/// the current instant, not a backlog of past slots.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(qps: f64) -> Result<Self, InvalidRate> {
        if !qps.is_finite() || qps <= 0.0 {
            return Err(InvalidRate(qps));
        }
        Ok(Self {
            interval: Duration::from_secs_f64(1.0 / qps),
            next_slot: Mutex::new(None),
        })
    }

    /// Blocks until the caller may issue its request.
    pub fn acquire(&self) {
        let wake_at = {
            let mut next_slot = self
                .next_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let slot = match *next_slot {
                Some(at) if at > now => at,
                _ => now,
            };
            *next_slot = Some(slot + self.interval);
            slot
        };

        let now = Instant::now();
        if wake_at > now {
            thread::sleep(wake_at - now);
        }
    }
}
