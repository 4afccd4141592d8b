//! Exponential backoff with a one-shot server override

use core_runtime::config::RetryConfig;
use std::time::Duration;

/// Delay sequence `initial * 2^attempt`, capped at `max`
///
/// A server-provided `Retry-After` replaces exactly the next delay; the
/// exponential sequence resumes afterwards.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
    override_next: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
            override_next: None,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.initial_backoff, config.max_backoff)
    }

    /// Use `delay` for the next call to [`Backoff::next_delay`] only
    pub fn override_next(&mut self, delay: Duration) {
        self.override_next = Some(delay);
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let computed = self.computed(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.override_next.take().unwrap_or(computed)
    }

    /// Number of delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.override_next = None;
    }

    fn computed(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.max)
    }
}
