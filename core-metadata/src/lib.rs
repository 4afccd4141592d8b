//! # Catalog Metadata Module
//!
//! Fetches catalog records from remote providers and normalizes them.
//!
//! ## Overview
//!
//! This module handles:
//! - Token-bucket rate limiting shared by every client of one provider
//! - Bounded exponential-backoff retry honouring `Retry-After`
//! - GraphQL (AniList) and REST (MangaDex) catalog providers
//! - Extraction of provider records into canonical items
//!
//! ## Architecture
//!
//! ```text
//! CatalogProvider (AniList / MangaDex)
//!         │
//!         ▼
//!   GraphQlClient ──► ApiClient ──► RateLimiter
//!                        │   └────► Backoff
//!                        ▼
//!                   HttpClient (bridge)
//! ```

pub mod backoff;
pub mod client;
pub mod error;
pub mod extractor;
pub mod graphql;
pub mod providers;
pub mod rate_limiter;

pub use backoff::Backoff;
pub use client::ApiClient;
pub use error::{MetadataError, Result};
pub use graphql::GraphQlClient;
pub use providers::{
    AniListProvider, CatalogPage, CatalogProvider, MangaDexProvider, PageRequest, RawRecord,
    SortOrder, StaffEntry,
};
pub use rate_limiter::RateLimiter;
