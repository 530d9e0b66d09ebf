use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Fixed-interval request limiter
///
/// Each `acquire` reserves the next issuance slot, at least `1 / max_per_second`
/// after the previous one, then sleeps until it. There is no burst allowance.
/// The lock only guards the slot reservation and is released before sleeping.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// A limiter allowing `max_per_second` issuances; non-positive rates disable it
    pub fn new(max_per_second: f64) -> Self {
        let min_interval = if max_per_second > 0.0 && max_per_second.is_finite() {
            Duration::from_secs_f64(1.0 / max_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    pub fn from_option(max_per_second: Option<f64>) -> Self {
        max_per_second.map_or_else(Self::unlimited, Self::new)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until this caller may issue a request
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let slot = {
            let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };

        sleep_until(slot).await;
    }
}
