//! # Exponential Backoff
//!
//! Provides a capped exponential backoff with jitter for retrying failed
//! reconciliations.
//!
//! Each attempt doubles the base delay until it reaches the cap. The returned
//! delay is scaled by a random factor in `0.5..1.5` so requests that failed
//! together do not retry together, and is never larger than the cap.
//!
//! ## Usage
//!
//! ```rust
//! use managed_serviceaccount::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(300));
//! let first = backoff.next_backoff();
//! assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(1500));
//! ```

use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay of the first attempt
    base: Duration,
    /// Upper bound of any returned delay
    max: Duration,
    /// Attempts made since the last reset
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff starting at `base` and capped at `max`
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Un-jittered delay for the current attempt
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Get the next jittered delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.current_delay();
        self.attempt = self.attempt.saturating_add(1);

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(delay.as_secs_f64() * jitter).min(self.max)
    }

    /// Number of delays handed out since the last reset
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
