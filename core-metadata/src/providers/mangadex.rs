//! MangaDex REST Provider
//!
//! ## API Endpoints
//!
//! - **List**: `GET https://api.mangadex.org/manga?limit&offset&order[...]&updatedAtSince&includes[]=...`
//! - **Detail**: `GET https://api.mangadex.org/manga/{id}?includes[]=...`
//!
//! Responses use the envelope `{result, data, limit, offset, total}`. A
//! `result` of `"error"` is a permanent failure, as is any 4xx other than 429.
//!
//! ## Mapping
//!
//! - Statuses are translated into the AniList vocabulary the extractor reads
//! - `author` relationships are credited as story, `artist` as art
//! - Only tags in the `genre` group become genres
//! - The cover URL is built from the `cover_art` relationship file name

use super::{local_id, CatalogPage, CatalogProvider, PageRequest, RawRecord, SortOrder, StaffEntry};
use crate::client::{provider_errors, ApiClient};
use crate::error::{MetadataError, Result};
use async_trait::async_trait;
use bridge_traits::http::{HttpMethod, HttpRequest};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// MangaDex API base URL
pub const MANGADEX_API_BASE: &str = "https://api.mangadex.org";

/// Cover image host
const MANGADEX_COVER_BASE: &str = "https://uploads.mangadex.org/covers";

/// External ID namespace
pub const MANGADEX_PREFIX: &str = "mangadex";

const MANGADEX_MAX_PAGE_SIZE: u32 = 100;

const INCLUDES: [&str; 3] = ["author", "artist", "cover_art"];

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    result: String,
    #[serde(default)]
    data: Vec<MangaData>,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct EntityEnvelope {
    result: String,
    data: Option<MangaData>,
}

#[derive(Debug, Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MangaAttributes {
    #[serde(default)]
    title: HashMap<String, String>,
    #[serde(default)]
    alt_titles: Vec<HashMap<String, String>>,
    #[serde(default)]
    description: HashMap<String, String>,
    status: Option<String>,
    last_chapter: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    attributes: TagAttributes,
}

#[derive(Debug, Deserialize)]
struct TagAttributes {
    #[serde(default)]
    name: HashMap<String, String>,
    group: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    kind: String,
    attributes: Option<RelationshipAttributes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationshipAttributes {
    name: Option<String>,
    file_name: Option<String>,
}

impl MangaAttributes {
    /// Title in `lang` from the main title map or the alternates
    fn title_in(&self, lang: &str) -> Option<String> {
        self.title
            .get(lang)
            .or_else(|| self.alt_titles.iter().find_map(|alt| alt.get(lang)))
            .cloned()
    }
}

/// Translate MangaDex status into the shared vocabulary
fn status_vocabulary(status: &str) -> String {
    match status.to_ascii_lowercase().as_str() {
        "ongoing" => "RELEASING".to_string(),
        "completed" => "FINISHED".to_string(),
        "hiatus" => "HIATUS".to_string(),
        "cancelled" => "CANCELLED".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

impl From<MangaData> for RawRecord {
    fn from(manga: MangaData) -> Self {
        let attributes = &manga.attributes;

        let title_english = attributes.title_in("en");
        let title_romaji = attributes.title_in("ja-ro");
        let title_native = attributes
            .title_in("ja")
            .or_else(|| attributes.title.values().next().cloned());

        let mut staff = Vec::new();
        let mut cover_url = None;
        for relationship in &manga.relationships {
            let Some(attrs) = &relationship.attributes else {
                continue;
            };
            match relationship.kind.as_str() {
                "author" | "artist" => {
                    if let Some(name) = &attrs.name {
                        let role = if relationship.kind == "author" { "Story" } else { "Art" };
                        staff.push(StaffEntry::new(name.clone(), role));
                    }
                }
                "cover_art" => {
                    if let Some(file_name) = &attrs.file_name {
                        cover_url =
                            Some(format!("{}/{}/{}", MANGADEX_COVER_BASE, manga.id, file_name));
                    }
                }
                _ => {}
            }
        }

        let genres = attributes
            .tags
            .iter()
            .filter(|tag| tag.attributes.group.as_deref() == Some("genre"))
            .filter_map(|tag| tag.attributes.name.get("en").cloned())
            .collect();

        RawRecord {
            external_id: format!("{}:{}", MANGADEX_PREFIX, manga.id),
            title_english,
            title_romaji,
            title_native,
            description: attributes.description.get("en").cloned(),
            status: attributes.status.as_deref().map(status_vocabulary),
            chapters: attributes
                .last_chapter
                .as_deref()
                .and_then(|c| c.trim().parse().ok()),
            cover_url,
            average_score: None,
            genres,
            staff,
            updated_at: attributes
                .updated_at
                .as_deref()
                .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
                .map(|at| at.with_timezone(&Utc)),
        }
    }
}

fn check_result(result: &str, body: &serde_json::Value) -> Result<()> {
    if result == "ok" {
        return Ok(());
    }
    let errors = provider_errors(body);
    Err(MetadataError::PermanentApi {
        status: None,
        message: if errors.is_empty() {
            format!("MangaDex result: {}", result)
        } else {
            errors.join("; ")
        },
    })
}

fn decode<T: serde::de::DeserializeOwned>(body: serde_json::Value) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| MetadataError::InvalidResponse(format!("MangaDex payload: {}", e)))
}

// =============================================================================
// Provider
// =============================================================================

/// MangaDex catalog provider
pub struct MangaDexProvider {
    api: ApiClient,
    base_url: String,
}

impl MangaDexProvider {
    pub fn new(api: ApiClient) -> Self {
        Self::with_base_url(api, MANGADEX_API_BASE)
    }

    pub fn with_base_url(api: ApiClient, base_url: impl Into<String>) -> Self {
        Self {
            api,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn list_url(&self, request: &PageRequest) -> String {
        let limit = request.per_page.clamp(1, MANGADEX_MAX_PAGE_SIZE);
        let offset = request.page.saturating_sub(1).saturating_mul(limit);

        let mut params: Vec<(String, String)> = vec![
            ("limit".to_string(), limit.to_string()),
            ("offset".to_string(), offset.to_string()),
        ];

        let order = match request.sort {
            SortOrder::Popularity => "order[followedCount]",
            SortOrder::RecentlyUpdated => "order[updatedAt]",
        };
        params.push((order.to_string(), "desc".to_string()));

        if let Some(since) = request.updated_since {
            params.push((
                "updatedAtSince".to_string(),
                since.format("%Y-%m-%dT%H:%M:%S").to_string(),
            ));
        }

        for include in INCLUDES {
            params.push(("includes[]".to_string(), include.to_string()));
        }

        format!("{}/manga?{}", self.base_url, encode_query(&params))
    }

    fn item_url(&self, id: &str) -> String {
        let params: Vec<(String, String)> = INCLUDES
            .iter()
            .map(|include| ("includes[]".to_string(), include.to_string()))
            .collect();
        format!(
            "{}/manga/{}?{}",
            self.base_url,
            urlencoding::encode(id),
            encode_query(&params)
        )
    }
}

fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl CatalogProvider for MangaDexProvider {
    fn name(&self) -> &'static str {
        MANGADEX_PREFIX
    }

    fn max_page_size(&self) -> u32 {
        MANGADEX_MAX_PAGE_SIZE
    }

    #[instrument(skip(self, cancel), fields(provider = "mangadex", page = request.page))]
    async fn fetch_page(
        &self,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<CatalogPage> {
        let http_request = HttpRequest::new(HttpMethod::Get, self.list_url(request))
            .header("Accept", "application/json");
        let body = self.api.execute_json(http_request, cancel).await?;

        let envelope: ListEnvelope = decode(body.clone())?;
        check_result(&envelope.result, &body)?;

        let fetched = envelope.data.len() as u32;
        let has_next_page = fetched > 0 && envelope.offset + fetched < envelope.total;
        let items: Vec<RawRecord> = envelope.data.into_iter().map(RawRecord::from).collect();

        debug!(
            items = items.len(),
            total = envelope.total,
            has_next_page,
            "Fetched MangaDex page"
        );

        Ok(CatalogPage {
            items,
            page: request.page,
            has_next_page,
        })
    }

    #[instrument(skip(self, cancel), fields(provider = "mangadex"))]
    async fn fetch_item(
        &self,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RawRecord>> {
        let id = local_id(external_id, MANGADEX_PREFIX).ok_or_else(|| {
            MetadataError::PermanentApi {
                status: None,
                message: format!("not a MangaDex ID: {}", external_id),
            }
        })?;

        let http_request =
            HttpRequest::new(HttpMethod::Get, self.item_url(id)).header("Accept", "application/json");

        let body = match self.api.execute_json(http_request, cancel).await {
            Ok(body) => body,
            Err(MetadataError::PermanentApi {
                status: Some(404), ..
            }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let envelope: EntityEnvelope = decode(body.clone())?;
        check_result(&envelope.result, &body)?;
        Ok(envelope.data.map(RawRecord::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manga_json() -> serde_json::Value {
        json!({
            "id": "a1c7c817-4e59-43b7-9365-09675a149a6f",
            "type": "manga",
            "attributes": {
                "title": { "en": "One Piece" },
                "altTitles": [{ "ja-ro": "Wan Pīsu" }, { "ja": "ワンピース" }],
                "description": { "en": "Gol D. Roger &amp; the treasure" },
                "status": "ongoing",
                "lastChapter": "1100",
                "tags": [
                    { "attributes": { "name": { "en": "Action" }, "group": "genre" } },
                    { "attributes": { "name": { "en": "Pirates" }, "group": "theme" } }
                ],
                "updatedAt": "2024-03-01T12:00:00+00:00"
            },
            "relationships": [
                { "id": "x", "type": "author", "attributes": { "name": "Oda Eiichiro" } },
                { "id": "y", "type": "artist", "attributes": { "name": "Oda Eiichiro" } },
                { "id": "z", "type": "cover_art", "attributes": { "fileName": "cover.jpg" } }
            ]
        })
    }

    #[test]
    fn test_manga_into_raw_record() {
        let manga: MangaData = serde_json::from_value(manga_json()).unwrap();
        let record = RawRecord::from(manga);

        assert_eq!(
            record.external_id,
            "mangadex:a1c7c817-4e59-43b7-9365-09675a149a6f"
        );
        assert_eq!(record.title_english.as_deref(), Some("One Piece"));
        assert_eq!(record.title_romaji.as_deref(), Some("Wan Pīsu"));
        assert_eq!(record.title_native.as_deref(), Some("ワンピース"));
        assert_eq!(record.status.as_deref(), Some("RELEASING"));
        assert_eq!(record.chapters, Some(1100));
        assert_eq!(record.genres, vec!["Action".to_string()]);
        assert_eq!(record.staff[0], StaffEntry::new("Oda Eiichiro", "Story"));
        assert_eq!(
            record.cover_url.as_deref(),
            Some("https://uploads.mangadex.org/covers/a1c7c817-4e59-43b7-9365-09675a149a6f/cover.jpg")
        );
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn test_status_vocabulary() {
        assert_eq!(status_vocabulary("completed"), "FINISHED");
        assert_eq!(status_vocabulary("ongoing"), "RELEASING");
        assert_eq!(status_vocabulary("hiatus"), "HIATUS");
        assert_eq!(status_vocabulary("cancelled"), "CANCELLED");
        assert_eq!(status_vocabulary("odd"), "ODD");
    }

    #[test]
    fn test_check_result() {
        assert!(check_result("ok", &json!({})).is_ok());

        let body = json!({"result": "error", "errors": [{"detail": "bad order"}]});
        match check_result("error", &body) {
            Err(MetadataError::PermanentApi { message, .. }) => assert_eq!(message, "bad order"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_encode_query_escapes_brackets() {
        let params = vec![("includes[]".to_string(), "cover_art".to_string())];
        assert_eq!(encode_query(&params), "includes%5B%5D=cover_art");
    }
}
