//! # Rate-Limited Retry Client
//!
//! The single request path every provider goes through.
//!
//! ## Overview
//!
//! [`ApiClient::execute_json`] sends one logical request and returns its
//! decoded JSON body. Every attempt:
//!
//! 1. takes a token from the shared [`RateLimiter`]
//! 2. issues the request through the platform [`HttpClient`] with the
//!    configured per-attempt timeout
//! 3. classifies the outcome
//!
//! | Outcome                          | Result                          |
//! |----------------------------------|---------------------------------|
//! | 2xx with a JSON body             | `Ok(value)`                     |
//! | 2xx with an undecodable body     | `PermanentApi`                  |
//! | 429                              | `RateLimited` (retried)         |
//! | 5xx                              | `Transient` (retried)           |
//! | other status                     | `PermanentApi`                  |
//! | connection error or timeout      | `Bridge` (retried)              |
//!
//! Retryable failures are retried up to `max_retries` times with exponential
//! backoff; a `Retry-After` header (delta-seconds or HTTP-date) replaces the
//! next delay. Limiter waits and backoff sleeps stop on cancellation. A
//! request already in flight is left to finish or time out.

use crate::backoff::Backoff;
use crate::error::{MetadataError, Result};
use crate::rate_limiter::RateLimiter;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_runtime::config::RetryConfig;
use core_runtime::logging::redact_url;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest body excerpt carried in an error message
const MAX_ERROR_BODY: usize = 256;

/// Retrying HTTP executor bound to one rate-limit budget
pub struct ApiClient {
    http_client: Arc<dyn HttpClient>,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
}

impl ApiClient {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        limiter: Arc<RateLimiter>,
        retry: RetryConfig,
    ) -> Self {
        Self::with_clock(http_client, limiter, retry, Arc::new(SystemClock))
    }

    /// Use a custom clock for resolving `Retry-After` HTTP-dates
    pub fn with_clock(
        http_client: Arc<dyn HttpClient>,
        limiter: Arc<RateLimiter>,
        retry: RetryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http_client,
            limiter,
            retry,
            clock,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Send `request` with rate limiting and retry, returning the JSON body
    ///
    /// # Errors
    ///
    /// - `Cancelled` if `cancel` fires while waiting for a token or backing off
    /// - the last retryable error once `max_retries` retries are exhausted
    /// - `PermanentApi` immediately for non-retryable responses
    pub async fn execute_json(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let request = request.timeout(self.retry.request_timeout);
        let url = redact_url(&request.url);
        let mut backoff = Backoff::from_config(&self.retry);
        let mut retries = 0u32;

        loop {
            self.limiter.acquire(cancel).await?;

            let error = match self.attempt(request.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() || retries >= self.retry.max_retries {
                if error.is_retryable() {
                    warn!(
                        url = %url,
                        retries,
                        error = %error,
                        "Retries exhausted"
                    );
                }
                return Err(error);
            }

            if let Some(retry_after) = error.retry_after() {
                backoff.override_next(retry_after);
            }
            let delay = backoff.next_delay();
            retries += 1;

            warn!(
                url = %url,
                attempt = retries,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Request failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MetadataError::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self, request: HttpRequest) -> Result<serde_json::Value> {
        let response = self.http_client.execute(request).await?;
        debug!(status = response.status, bytes = response.body.len(), "Received response");
        self.classify(response)
    }

    fn classify(&self, response: HttpResponse) -> Result<serde_json::Value> {
        if response.is_success() {
            return serde_json::from_slice(&response.body).map_err(|e| {
                MetadataError::PermanentApi {
                    status: Some(response.status),
                    message: format!("undecodable response body: {}", e),
                }
            });
        }

        let retry_after = response
            .header("Retry-After")
            .and_then(|value| parse_retry_after(value, self.clock.now()));

        if response.status == 429 {
            return Err(MetadataError::RateLimited { retry_after });
        }

        if response.is_server_error() {
            return Err(MetadataError::Transient {
                message: format!("HTTP {}: {}", response.status, error_message(&response)),
                retry_after,
            });
        }

        Err(MetadataError::PermanentApi {
            status: Some(response.status),
            message: error_message(&response),
        })
    }
}

/// Parse a `Retry-After` value given as delta-seconds or an HTTP-date
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Best-effort human message from an error body
///
/// Understands GraphQL `errors[].message` and REST `errors[].detail`.
pub fn error_message(response: &HttpResponse) -> String {
    if let Ok(body) = serde_json::from_slice::<serde_json::Value>(&response.body) {
        let messages = provider_errors(&body);
        if !messages.is_empty() {
            return messages.join("; ");
        }
    }

    let text = String::from_utf8_lossy(&response.body);
    let text = text.trim();
    if text.is_empty() {
        return format!("HTTP {}", response.status);
    }
    text.chars().take(MAX_ERROR_BODY).collect()
}

/// Messages from a non-empty top-level `errors` array
pub fn provider_errors(body: &serde_json::Value) -> Vec<String> {
    body.get("errors")
        .and_then(|errors| errors.as_array())
        .map(|errors| {
            errors
                .iter()
                .map(|error| {
                    error
                        .get("message")
                        .or_else(|| error.get("detail"))
                        .or_else(|| error.get("title"))
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string())
                })
                .collect()
        })
        .unwrap_or_default()
}
