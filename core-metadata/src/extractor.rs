//! Catalog Record Extraction and Normalization
//!
//! Pure transform from a provider [`RawRecord`] to a [`CanonicalItem`].
//!
//! ## Overview
//!
//! - Picks the title: English, else romanized, else native
//! - Derives a URL slug from the title (falls back to the external ID)
//! - Strips markup from descriptions and decodes HTML entities
//! - Maps provider statuses onto [`ItemStatus`] (unknown values are ongoing)
//! - Rescales the 0-100 score onto 0-10
//! - Credits the first story writer as author
//! - Deduplicates genres, keeping provider order
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::extractor::extract;
//!
//! let item = extract(&record, clock.now())?;
//! repository.upsert(&item).await?;
//! ```

use crate::error::{MetadataError, Result};
use crate::providers::{RawRecord, StaffEntry};
use chrono::{DateTime, Utc};
use core_library::models::{CanonicalItem, ItemStatus};
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::LazyLock;

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());

static MARKUP_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap());

/// Staff roles credited as author
const AUTHOR_ROLES: [&str; 2] = ["story", "story & art"];

/// Normalize a raw provider record
///
/// # Errors
///
/// Returns [`MetadataError::MissingRequiredField`] when the record has no
/// usable title or no external ID.
pub fn extract(raw: &RawRecord, synced_at: DateTime<Utc>) -> Result<CanonicalItem> {
    if raw.external_id.trim().is_empty() {
        return Err(MetadataError::MissingRequiredField("external_id".to_string()));
    }

    let title = select_title(raw)
        .ok_or_else(|| MetadataError::MissingRequiredField("title".to_string()))?;

    let mut item_slug = slug(&title);
    if item_slug.is_empty() {
        item_slug = slug(&raw.external_id.replace(':', " "));
    }

    Ok(CanonicalItem {
        external_id: raw.external_id.clone(),
        title,
        slug: item_slug,
        status: map_status(raw.status.as_deref()),
        chapters: raw.chapters,
        description: raw
            .description
            .as_deref()
            .map(clean_description)
            .unwrap_or_default(),
        cover_url: raw
            .cover_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string),
        rating: raw.average_score.map(scale_rating),
        author: select_author(&raw.staff),
        genres: dedupe_genres(&raw.genres),
        last_synced_at: synced_at,
        last_refresh_check_at: None,
    })
}

/// First non-blank title in locale preference order
fn select_title(raw: &RawRecord) -> Option<String> {
    [&raw.title_english, &raw.title_romaji, &raw.title_native]
        .into_iter()
        .flatten()
        .map(|title| title.trim())
        .find(|title| !title.is_empty())
        .map(str::to_string)
}

/// URL slug of a title
///
/// Lowercase, whitespace becomes a hyphen, everything outside `[a-z0-9-]`
/// is dropped, hyphen runs collapse and edge hyphens are trimmed.
///
/// ```ignore
/// assert_eq!(slug("Kaguya-sama: Love Is War"), "kaguya-sama-love-is-war");
/// ```
pub fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else if c == '-' || c.is_whitespace() {
            pending_hyphen = true;
        }
    }

    out
}

/// Plain-text description: `<br>` to newline, tags removed, entities decoded
pub fn clean_description(description: &str) -> String {
    let with_breaks = LINE_BREAK.replace_all(description, "\n");
    let without_tags = MARKUP_TAG.replace_all(&with_breaks, "");
    decode_entities(&without_tags).trim().to_string()
}

/// Decode named and numeric HTML entities in a single pass
///
/// Unknown entities are left as written.
pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some('\u{a0}'),
                    _ => None,
                }
            };

            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Map a provider status onto [`ItemStatus`]; unknown or missing is ongoing
pub fn map_status(status: Option<&str>) -> ItemStatus {
    let Some(status) = status else {
        return ItemStatus::Ongoing;
    };

    match status.trim().to_ascii_uppercase().as_str() {
        "FINISHED" => ItemStatus::Completed,
        "RELEASING" => ItemStatus::Ongoing,
        "NOT_YET_RELEASED" => ItemStatus::Upcoming,
        "CANCELLED" => ItemStatus::Cancelled,
        "HIATUS" => ItemStatus::Hiatus,
        _ => ItemStatus::Ongoing,
    }
}

fn scale_rating(score: u32) -> f64 {
    f64::from(score.min(100)) / 10.0
}

fn select_author(staff: &[StaffEntry]) -> String {
    staff
        .iter()
        .find(|entry| {
            let role = entry.role.trim();
            AUTHOR_ROLES.iter().any(|r| role.eq_ignore_ascii_case(r))
        })
        .map(|entry| entry.name.trim().to_string())
        .unwrap_or_default()
}

fn dedupe_genres(genres: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    genres
        .iter()
        .map(|genre| genre.trim())
        .filter(|genre| !genre.is_empty())
        .filter(|genre| seen.insert(*genre))
        .map(str::to_string)
        .collect()
}
