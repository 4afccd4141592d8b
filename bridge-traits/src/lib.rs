//! # Host Bridge Traits
//!
//! Platform abstraction traits the sync engine depends on.
//!
//! ## Overview
//!
//! This crate defines the contract between the engine crates and the concrete
//! platform implementations. Keeping these seams as traits lets the engine be
//! exercised against mocks in tests and against `bridge-desktop` in production.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP operations
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type.
//! Implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Report connection failures as `Network`/`Timeout` so callers can retry
//! - Include error context (URL, status) in messages
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.

pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use time::{Clock, ManualClock, SystemClock};
