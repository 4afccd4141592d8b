//! # Token Bucket Rate Limiter
//!
//! Shared request budget for every client talking to one provider.
//!
//! ## Overview
//!
//! The bucket holds at most `burst` tokens and refills continuously at
//! `requests_per_second`. Each outgoing request (including every retry
//! attempt) takes one token. When the bucket is empty, [`RateLimiter::acquire`]
//! sleeps until the next token is due, or returns
//! [`MetadataError::Cancelled`] as soon as the caller's token fires.
//!
//! Over any rolling one-second window at most `burst + requests_per_second`
//! requests are admitted.
//!
//! ## Usage
//!
//! ```ignore
//! let limiter = Arc::new(RateLimiter::new(1.5, 5));
//! limiter.acquire(&cancel).await?;
//! ```
//!
//! The limiter is an owned value: clients that share a budget share the
//! same `Arc<RateLimiter>`.

use crate::error::{MetadataError, Result};
use core_runtime::config::RateLimitConfig;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiter driven by tokio's clock
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_second: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter starting with a full bucket
    ///
    /// Non-positive rates are clamped to a tiny positive rate and a zero
    /// burst to one token, so `acquire` can always make progress.
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        let requests_per_second = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            requests_per_second
        } else {
            f64::EPSILON
        };
        let burst = f64::from(burst.max(1));

        Self {
            requests_per_second,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst)
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.take_or_wait().is_none()
    }

    /// Wait for a token
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Cancelled`] if `cancel` fires before a token
    /// becomes available.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(MetadataError::Cancelled);
            }

            let wait = match self.take_or_wait() {
                None => return Ok(()),
                Some(wait) => wait,
            };

            trace!(wait_ms = wait.as_millis() as u64, "Rate limiter waiting for token");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MetadataError::Cancelled),
                _ = sleep(wait) => {}
            }
        }
    }

    /// Tokens currently available, after refill
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    /// Consume one token, or report how long until one is due
    fn take_or_wait(&self) -> Option<Duration> {
        let mut bucket = self.lock();
        self.refill(&mut bucket, Instant::now());

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - bucket.tokens;
            let wait = Duration::from_secs_f64(missing / self.requests_per_second);
            // Never spin on a zero-length sleep due to rounding.
            Some(wait.max(Duration::from_micros(1)))
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.requests_per_second).min(self.burst);
        bucket.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        match self.bucket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
