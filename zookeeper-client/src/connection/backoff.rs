//! Reconnect delay calculation.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Decorrelated-jitter backoff.
///
/// Each delay is drawn uniformly from `[base, previous * 3]` and capped at
/// `cap`, so consecutive delays grow without synchronizing across clients.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    previous: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `base` and never exceeding `cap`.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            previous: base,
        }
    }

    /// Creates a backoff from the retry settings.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.initial_backoff(), config.max_backoff())
    }

    /// Returns the next delay.
    pub fn next_delay(&mut self) -> Duration {
        let delay = decorrelated_jitter(self.base, self.previous, self.cap);
        self.previous = delay;
        delay
    }

    /// Starts over from the base delay.
    pub fn reset(&mut self) {
        self.previous = self.base;
    }
}

fn decorrelated_jitter(base: Duration, previous: Duration, cap: Duration) -> Duration {
    let low = base.as_micros() as u64;
    let high = (previous.as_micros() as u64).saturating_mul(3).max(low);

    let micros = if high > low {
        rand::thread_rng().gen_range(low..=high)
    } else {
        low
    };

    std::cmp::min(Duration::from_micros(micros), cap)
}
