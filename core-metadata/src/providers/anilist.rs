//! AniList GraphQL Provider
//!
//! ## API Endpoint
//!
//! - **GraphQL**: `POST https://graphql.anilist.co` with `{query, variables}`
//!
//! ## Queries
//!
//! - `Page(page, perPage) { pageInfo, media(type: MANGA, sort) }` for listing
//! - `Media(id, type: MANGA)` for refresh detail
//!
//! ## Rate Limiting
//!
//! AniList allows roughly 90 requests per minute and answers 429 with a
//! `Retry-After` header. Both are handled by the shared limiter and retry
//! policy of [`ApiClient`].
//!
//! ## Incremental Listing
//!
//! The API has no "updated after" filter, so discovery asks for
//! `UPDATED_AT_DESC` and the provider cuts the page at the first entry not
//! newer than `updated_since`, reporting no further pages.
//!
//! ## Usage
//!
//! ```ignore
//! let api = ApiClient::new(http_client, limiter, config.retry.clone());
//! let provider = AniListProvider::new(api);
//! let page = provider.fetch_page(&PageRequest::new(1, 50, SortOrder::Popularity), &cancel).await?;
//! ```

use super::{local_id, CatalogPage, CatalogProvider, PageRequest, RawRecord, SortOrder, StaffEntry};
use crate::client::ApiClient;
use crate::error::{MetadataError, Result};
use crate::graphql::GraphQlClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// AniList GraphQL endpoint
pub const ANILIST_ENDPOINT: &str = "https://graphql.anilist.co";

/// External ID namespace
pub const ANILIST_PREFIX: &str = "anilist";

/// AniList rejects `perPage` above 50
const ANILIST_MAX_PAGE_SIZE: u32 = 50;

const MEDIA_FIELDS: &str = r#"
    id
    title { romaji english native }
    description
    status
    chapters
    coverImage { large }
    averageScore
    genres
    updatedAt
    staff(perPage: 25) { edges { role node { name { full } } } }
"#;

fn page_query() -> String {
    format!(
        r#"query ($page: Int, $perPage: Int, $sort: [MediaSort]) {{
  Page(page: $page, perPage: $perPage) {{
    pageInfo {{ currentPage hasNextPage }}
    media(type: MANGA, sort: $sort) {{ {} }}
  }}
}}"#,
        MEDIA_FIELDS
    )
}

fn media_query() -> String {
    format!(
        r#"query ($id: Int) {{
  Media(id: $id, type: MANGA) {{ {} }}
}}"#,
        MEDIA_FIELDS
    )
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct PageData {
    #[serde(rename = "Page")]
    page: PageBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageBody {
    page_info: PageInfo,
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    current_page: Option<u32>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
struct MediaData {
    #[serde(rename = "Media")]
    media: Option<Media>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Media {
    id: u64,
    #[serde(default)]
    title: MediaTitle,
    description: Option<String>,
    status: Option<String>,
    chapters: Option<u32>,
    cover_image: Option<CoverImage>,
    average_score: Option<u32>,
    #[serde(default)]
    genres: Vec<String>,
    updated_at: Option<i64>,
    staff: Option<StaffConnection>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaTitle {
    romaji: Option<String>,
    english: Option<String>,
    native: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoverImage {
    large: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StaffConnection {
    #[serde(default)]
    edges: Vec<StaffEdge>,
}

#[derive(Debug, Deserialize)]
struct StaffEdge {
    role: Option<String>,
    node: Option<StaffNode>,
}

#[derive(Debug, Deserialize)]
struct StaffNode {
    name: Option<StaffName>,
}

#[derive(Debug, Deserialize)]
struct StaffName {
    full: Option<String>,
}

impl From<Media> for RawRecord {
    fn from(media: Media) -> Self {
        let staff = media
            .staff
            .map(|connection| {
                connection
                    .edges
                    .into_iter()
                    .filter_map(|edge| {
                        let name = edge.node?.name?.full?;
                        Some(StaffEntry::new(name, edge.role.unwrap_or_default()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        RawRecord {
            external_id: format!("{}:{}", ANILIST_PREFIX, media.id),
            title_english: media.title.english,
            title_romaji: media.title.romaji,
            title_native: media.title.native,
            description: media.description,
            status: media.status,
            chapters: media.chapters,
            cover_url: media.cover_image.and_then(|c| c.large),
            average_score: media.average_score,
            genres: media.genres,
            staff,
            updated_at: media
                .updated_at
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: serde_json::Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| MetadataError::InvalidResponse(format!("AniList payload: {}", e)))
}

// =============================================================================
// Provider
// =============================================================================

/// AniList catalog provider
pub struct AniListProvider {
    client: GraphQlClient,
}

impl AniListProvider {
    pub fn new(api: ApiClient) -> Self {
        Self::with_endpoint(api, ANILIST_ENDPOINT)
    }

    pub fn with_endpoint(api: ApiClient, endpoint: impl Into<String>) -> Self {
        Self {
            client: GraphQlClient::new(api, endpoint),
        }
    }

    fn sort_key(sort: SortOrder) -> &'static str {
        match sort {
            SortOrder::Popularity => "POPULARITY_DESC",
            SortOrder::RecentlyUpdated => "UPDATED_AT_DESC",
        }
    }
}

/// Keep records updated after `since`; report whether the cut happened
///
/// Input must be sorted by most recently updated first.
fn cut_at(records: Vec<RawRecord>, since: DateTime<Utc>) -> (Vec<RawRecord>, bool) {
    let total = records.len();
    let kept: Vec<RawRecord> = records
        .into_iter()
        .take_while(|record| record.updated_at.map_or(true, |at| at > since))
        .collect();
    let cut = kept.len() < total;
    (kept, cut)
}

#[async_trait]
impl CatalogProvider for AniListProvider {
    fn name(&self) -> &'static str {
        ANILIST_PREFIX
    }

    fn max_page_size(&self) -> u32 {
        ANILIST_MAX_PAGE_SIZE
    }

    #[instrument(skip(self, cancel), fields(provider = "anilist", page = request.page))]
    async fn fetch_page(
        &self,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<CatalogPage> {
        let per_page = request.per_page.clamp(1, ANILIST_MAX_PAGE_SIZE);
        let variables = json!({
            "page": request.page,
            "perPage": per_page,
            "sort": [Self::sort_key(request.sort)],
        });

        let data = self.client.execute(&page_query(), variables, cancel).await?;
        let body: PageData = decode(data)?;

        let records: Vec<RawRecord> = body.page.media.into_iter().map(RawRecord::from).collect();
        let mut has_next_page = body.page.page_info.has_next_page;

        let items = match request.updated_since {
            Some(since) => {
                let (kept, cut) = cut_at(records, since);
                if cut {
                    has_next_page = false;
                }
                kept
            }
            None => records,
        };

        debug!(
            items = items.len(),
            has_next_page,
            current_page = ?body.page.page_info.current_page,
            "Fetched AniList page"
        );

        Ok(CatalogPage {
            items,
            page: request.page,
            has_next_page,
        })
    }

    #[instrument(skip(self, cancel), fields(provider = "anilist"))]
    async fn fetch_item(
        &self,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RawRecord>> {
        let id: u64 = local_id(external_id, ANILIST_PREFIX)
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| MetadataError::PermanentApi {
                status: None,
                message: format!("not an AniList ID: {}", external_id),
            })?;

        let data = match self
            .client
            .execute(&media_query(), json!({ "id": id }), cancel)
            .await
        {
            Ok(data) => data,
            Err(MetadataError::PermanentApi {
                status: Some(404), ..
            }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let body: MediaData = decode(data)?;
        Ok(body.media.map(RawRecord::from))
    }
}
