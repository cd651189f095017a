//! Exponential reconnection backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Upper bound of the random extra fraction added to each delay.
pub const JITTER_FACTOR: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// `min(max, max(min * 2^attempt, min))`, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponential = self.min.as_secs_f64() * 2f64.powi(attempt.min(64) as i32);
        let capped = exponential
            .max(self.min.as_secs_f64())
            .min(self.max.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Delay before the given attempt with up to 30% random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FACTOR);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Jittered delay, never above the configured cap.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let jitter = jitter.clamp(0.0, JITTER_FACTOR);
        self.base_delay(attempt).mul_f64(1.0 + jitter).min(self.max)
    }
}
