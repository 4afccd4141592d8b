//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the catalog sync engine:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Outbound notifications
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the engine crates depend on.
//! It establishes the configuration surface, logging conventions, and the
//! fire-and-forget notification channel used throughout the system.

pub mod config;
pub mod error;
pub mod logging;
pub mod notifier;

pub use config::{
    NotifierConfig, ProviderKind, RateLimitConfig, RetryConfig, ScheduleConfig, SyncEngineConfig,
};
pub use error::{Error, Result};
pub use notifier::{HttpNotifier, NoopNotifier, Notifier};
