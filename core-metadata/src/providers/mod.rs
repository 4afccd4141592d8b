//! External Catalog Providers
//!
//! This module contains clients for the remote catalog services:
//! - AniList - GraphQL API (`https://graphql.anilist.co`)
//! - MangaDex - REST API (`https://api.mangadex.org`)
//!
//! Both decode their wire format into the provider-neutral [`RawRecord`],
//! which [`crate::extractor`] turns into a canonical item. Both share one
//! [`crate::rate_limiter::RateLimiter`] type and the retry policy of
//! [`crate::client::ApiClient`].

pub mod anilist;
pub mod mangadex;

pub use anilist::AniListProvider;
pub use mangadex::MangaDexProvider;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Staff credit on a catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffEntry {
    pub name: String,
    /// Free-form role as reported by the provider, e.g. "Story & Art"
    pub role: String,
}

impl StaffEntry {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }
}

/// Provider-neutral raw catalog record
///
/// Status uses the AniList vocabulary (`RELEASING`, `FINISHED`, ...);
/// providers with a different vocabulary translate into it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    /// Provider-namespaced ID, e.g. `anilist:30013`
    pub external_id: String,
    pub title_english: Option<String>,
    pub title_romaji: Option<String>,
    pub title_native: Option<String>,
    /// May contain HTML markup and entities
    pub description: Option<String>,
    pub status: Option<String>,
    pub chapters: Option<u32>,
    pub cover_url: Option<String>,
    /// 0-100 scale
    pub average_score: Option<u32>,
    pub genres: Vec<String>,
    pub staff: Vec<StaffEntry>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Page ordering requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Most popular first (bulk load)
    Popularity,
    /// Most recently updated first (discovery)
    RecentlyUpdated,
}

/// One page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
    pub sort: SortOrder,
    /// Only items updated strictly after this instant
    pub updated_since: Option<DateTime<Utc>>,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32, sort: SortOrder) -> Self {
        Self {
            page,
            per_page,
            sort,
            updated_since: None,
        }
    }

    pub fn updated_since(mut self, since: DateTime<Utc>) -> Self {
        self.updated_since = Some(since);
        self
    }
}

/// One page of raw records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogPage {
    pub items: Vec<RawRecord>,
    pub page: u32,
    pub has_next_page: bool,
}

/// Remote catalog source
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Short provider name used in logs and external ID prefixes
    fn name(&self) -> &'static str;

    /// Largest page size the provider accepts
    fn max_page_size(&self) -> u32;

    /// Fetch one page of records
    ///
    /// # Errors
    ///
    /// Returns `Cancelled`, a retryable error once retries are exhausted, or
    /// a permanent provider error.
    async fn fetch_page(
        &self,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<CatalogPage>;

    /// Fetch the current detail for one item
    ///
    /// # Returns
    /// - `Ok(Some(record))` if the provider still has the item
    /// - `Ok(None)` if the provider no longer returns it
    async fn fetch_item(
        &self,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RawRecord>>;
}

/// Split a namespaced external ID into its provider-local part
pub(crate) fn local_id<'a>(external_id: &'a str, prefix: &str) -> Option<&'a str> {
    external_id
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|rest| !rest.is_empty())
}
