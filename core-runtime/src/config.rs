//! # Engine Configuration Module
//!
//! Provides the operator-facing configuration surface of the sync engine.
//!
//! ## Overview
//!
//! `SyncEngineConfig` gathers every tunable the engine exposes: request rate
//! and burst, retry/backoff bounds, worker count, the three polling schedules,
//! notifier endpoints and logging. Values come from `Default` (production
//! defaults), from `with_*` builder calls, or from `CATALOG_SYNC_*`
//! environment variables via [`SyncEngineConfig::from_env`].
//!
//! Validation is fail-fast: [`SyncEngineConfig::validate`] returns an
//! actionable [`Error::Config`] for the first invalid value.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SyncEngineConfig;
//! use std::time::Duration;
//!
//! let config = SyncEngineConfig::from_env()?
//!     .with_workers(8)
//!     .with_discovery_interval(Duration::from_secs(300));
//! config.validate()?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CATALOG_SYNC_DATABASE_URL` | `catalog.db` |
//! | `CATALOG_SYNC_PROVIDER` | `anilist` |
//! | `CATALOG_SYNC_REQUESTS_PER_SECOND` | `1.5` |
//! | `CATALOG_SYNC_BURST` | `5` |
//! | `CATALOG_SYNC_WORKERS` | `4` |
//! | `CATALOG_SYNC_INITIAL_LOAD_TARGET` | `500` |
//! | `CATALOG_SYNC_PAGE_SIZE` | `50` |
//! | `CATALOG_SYNC_BULK_LOAD_INTERVAL_SECS` | `3600` |
//! | `CATALOG_SYNC_DISCOVERY_INTERVAL_SECS` | `900` |
//! | `CATALOG_SYNC_REFRESH_INTERVAL_SECS` | `3600` |
//! | `CATALOG_SYNC_REFRESH_STALENESS_SECS` | `86400` |
//! | `CATALOG_SYNC_REFRESH_BATCH_LIMIT` | `100` |
//! | `CATALOG_SYNC_DISCOVERY_LOOKBACK_SECS` | `86400` |
//! | `CATALOG_SYNC_MAX_RETRIES` | `5` |
//! | `CATALOG_SYNC_INITIAL_BACKOFF_MS` | `1000` |
//! | `CATALOG_SYNC_MAX_BACKOFF_MS` | `60000` |
//! | `CATALOG_SYNC_HTTP_TIMEOUT_MS` | `30000` |
//! | `CATALOG_SYNC_NOTIFY_NEW_ITEM_URL` | unset |
//! | `CATALOG_SYNC_NOTIFY_FIELD_CHANGE_URL` | unset |
//! | `CATALOG_SYNC_NOTIFY_QUEUE_CAPACITY` | `256` |
//! | `CATALOG_SYNC_LOG_LEVEL` | `info` |
//! | `CATALOG_SYNC_LOG_FORMAT` | build dependent |

use crate::error::{Error, Result};
use crate::logging::{LogFormat, LogLevel, LoggingConfig};
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "CATALOG_SYNC_";

/// Largest page size any supported provider accepts
pub const MAX_PAGE_SIZE: u32 = 100;

// ============================================================================
// Provider Selection
// ============================================================================

/// Which remote catalog feeds the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// AniList GraphQL API
    #[default]
    AniList,
    /// MangaDex REST API
    MangaDex,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::AniList => "anilist",
            ProviderKind::MangaDex => "mangadex",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anilist" => Ok(ProviderKind::AniList),
            "mangadex" => Ok(ProviderKind::MangaDex),
            other => Err(Error::Config(format!(
                "Unknown provider '{}': expected 'anilist' or 'mangadex'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Token-bucket parameters shared by every client of one provider
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Sustained request rate (requests per second)
    pub requests_per_second: f64,
    /// Bucket capacity (maximum burst)
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            // AniList allows 90 requests per minute
            requests_per_second: 1.5,
            burst: 5,
        }
    }
}

/// Retry and backoff bounds for remote calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any computed delay
    pub max_backoff: Duration,
    /// Per-attempt HTTP deadline
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Polling schedule and batch sizes for the three sync operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Number of items the one-time bulk load submits
    pub initial_load_target: u32,
    /// Items requested per page
    pub page_size: u32,
    pub bulk_load_interval: Duration,
    pub discovery_interval: Duration,
    pub refresh_interval: Duration,
    /// Items checked less recently than this are due for refresh
    pub refresh_staleness: Duration,
    /// Maximum items refreshed per tick
    pub refresh_batch_limit: u32,
    /// Discovery window used before the first successful discovery run
    pub discovery_lookback: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            initial_load_target: 500,
            page_size: 50,
            bulk_load_interval: Duration::from_secs(60 * 60),
            discovery_interval: Duration::from_secs(15 * 60),
            refresh_interval: Duration::from_secs(60 * 60),
            refresh_staleness: Duration::from_secs(24 * 60 * 60),
            refresh_batch_limit: 100,
            discovery_lookback: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Outbound notification endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    pub new_item_url: Option<String>,
    pub field_change_url: Option<String>,
    /// Pending notifications kept before new ones are dropped
    pub queue_capacity: usize,
    pub request_timeout: Duration,
}

impl NotifierConfig {
    /// Whether any endpoint is configured
    pub fn is_enabled(&self) -> bool {
        self.new_item_url.is_some() || self.field_change_url.is_some()
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            new_item_url: None,
            field_change_url: None,
            queue_capacity: 256,
            request_timeout: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// SQLite database path or URL
    pub database_url: String,
    pub provider: ProviderKind,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    /// Worker pool size per operation run
    pub workers: usize,
    pub schedule: ScheduleConfig,
    pub notifier: NotifierConfig,
    pub logging: LoggingConfig,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            database_url: "catalog.db".to_string(),
            provider: ProviderKind::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            workers: 4,
            schedule: ScheduleConfig::default(),
            notifier: NotifierConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncEngineConfig {
    /// Load configuration from `CATALOG_SYNC_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable is present but unparseable.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// Keys are the full variable names (`CATALOG_SYNC_WORKERS`, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = Self::default();

        let rate_limit = RateLimitConfig {
            requests_per_second: env
                .parse("REQUESTS_PER_SECOND")?
                .unwrap_or(defaults.rate_limit.requests_per_second),
            burst: env.parse("BURST")?.unwrap_or(defaults.rate_limit.burst),
        };

        let retry = RetryConfig {
            max_retries: env
                .parse("MAX_RETRIES")?
                .unwrap_or(defaults.retry.max_retries),
            initial_backoff: env
                .millis("INITIAL_BACKOFF_MS")?
                .unwrap_or(defaults.retry.initial_backoff),
            max_backoff: env
                .millis("MAX_BACKOFF_MS")?
                .unwrap_or(defaults.retry.max_backoff),
            request_timeout: env
                .millis("HTTP_TIMEOUT_MS")?
                .unwrap_or(defaults.retry.request_timeout),
        };

        let schedule = ScheduleConfig {
            initial_load_target: env
                .parse("INITIAL_LOAD_TARGET")?
                .unwrap_or(defaults.schedule.initial_load_target),
            page_size: env
                .parse("PAGE_SIZE")?
                .unwrap_or(defaults.schedule.page_size),
            bulk_load_interval: env
                .secs("BULK_LOAD_INTERVAL_SECS")?
                .unwrap_or(defaults.schedule.bulk_load_interval),
            discovery_interval: env
                .secs("DISCOVERY_INTERVAL_SECS")?
                .unwrap_or(defaults.schedule.discovery_interval),
            refresh_interval: env
                .secs("REFRESH_INTERVAL_SECS")?
                .unwrap_or(defaults.schedule.refresh_interval),
            refresh_staleness: env
                .secs("REFRESH_STALENESS_SECS")?
                .unwrap_or(defaults.schedule.refresh_staleness),
            refresh_batch_limit: env
                .parse("REFRESH_BATCH_LIMIT")?
                .unwrap_or(defaults.schedule.refresh_batch_limit),
            discovery_lookback: env
                .secs("DISCOVERY_LOOKBACK_SECS")?
                .unwrap_or(defaults.schedule.discovery_lookback),
        };

        let notifier = NotifierConfig {
            new_item_url: env.string("NOTIFY_NEW_ITEM_URL"),
            field_change_url: env.string("NOTIFY_FIELD_CHANGE_URL"),
            queue_capacity: env
                .parse("NOTIFY_QUEUE_CAPACITY")?
                .unwrap_or(defaults.notifier.queue_capacity),
            request_timeout: defaults.notifier.request_timeout,
        };

        let mut logging = defaults.logging;
        if let Some(level) = env.parse::<LogLevel>("LOG_LEVEL")? {
            logging = logging.with_level(level);
        }
        if let Some(format) = env.parse::<LogFormat>("LOG_FORMAT")? {
            logging = logging.with_format(format);
        }

        Ok(Self {
            database_url: env.string("DATABASE_URL").unwrap_or(defaults.database_url),
            provider: env.parse("PROVIDER")?.unwrap_or(defaults.provider),
            rate_limit,
            retry,
            workers: env.parse("WORKERS")?.unwrap_or(defaults.workers),
            schedule,
            notifier,
            logging,
        })
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: f64, burst: u32) -> Self {
        self.rate_limit = RateLimitConfig {
            requests_per_second,
            burst,
        };
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry.initial_backoff = initial;
        self.retry.max_backoff = max;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_initial_load_target(mut self, target: u32) -> Self {
        self.schedule.initial_load_target = target;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.schedule.page_size = page_size;
        self
    }

    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.schedule.discovery_interval = interval;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.schedule.refresh_interval = interval;
        self
    }

    pub fn with_refresh_staleness(mut self, threshold: Duration) -> Self {
        self.schedule.refresh_staleness = threshold;
        self
    }

    pub fn with_notifier(mut self, notifier: NotifierConfig) -> Self {
        self.notifier = notifier;
        self
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::Config("Database URL cannot be empty".to_string()));
        }

        let rps = self.rate_limit.requests_per_second;
        if !rps.is_finite() || rps <= 0.0 {
            return Err(Error::Config(format!(
                "Requests per second must be a positive number, got {}",
                rps
            )));
        }
        if self.rate_limit.burst == 0 {
            return Err(Error::Config("Burst size must be at least 1".to_string()));
        }

        if self.retry.initial_backoff.is_zero() {
            return Err(Error::Config(
                "Initial backoff must be greater than 0ms".to_string(),
            ));
        }
        if self.retry.max_backoff < self.retry.initial_backoff {
            return Err(Error::Config(format!(
                "Max backoff ({:?}) must not be smaller than initial backoff ({:?})",
                self.retry.max_backoff, self.retry.initial_backoff
            )));
        }
        if self.retry.request_timeout.is_zero() {
            return Err(Error::Config(
                "HTTP timeout must be greater than 0ms".to_string(),
            ));
        }

        if self.workers == 0 || self.workers > 64 {
            return Err(Error::Config(format!(
                "Worker count must be between 1 and 64, got {}",
                self.workers
            )));
        }

        let schedule = &self.schedule;
        if schedule.initial_load_target == 0 {
            return Err(Error::Config(
                "Initial load target must be at least 1".to_string(),
            ));
        }
        if schedule.page_size == 0 || schedule.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "Page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, schedule.page_size
            )));
        }
        for (name, interval) in [
            ("Bulk load interval", schedule.bulk_load_interval),
            ("Discovery interval", schedule.discovery_interval),
            ("Refresh interval", schedule.refresh_interval),
            ("Refresh staleness threshold", schedule.refresh_staleness),
        ] {
            if interval.is_zero() {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }
        if schedule.refresh_batch_limit == 0 {
            return Err(Error::Config(
                "Refresh batch limit must be at least 1".to_string(),
            ));
        }

        if self.notifier.queue_capacity == 0 {
            return Err(Error::Config(
                "Notifier queue capacity must be at least 1".to_string(),
            ));
        }
        for url in [&self.notifier.new_item_url, &self.notifier.field_change_url]
            .into_iter()
            .flatten()
        {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "Notifier endpoint must be an http(s) URL, got '{}'",
                    crate::logging::redact_url(url)
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Environment Parsing
// ============================================================================

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, name))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(name) {
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                Error::Config(format!("Invalid {}{}='{}': {}", ENV_PREFIX, name, raw, e))
            }),
            None => Ok(None),
        }
    }

    fn secs(&self, name: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_secs))
    }

    fn millis(&self, name: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_millis))
    }
}
