//! Domain models for the catalog store
//!
//! The canonical item is the provider-neutral representation every provider
//! record is normalized into before it is stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Item Status
// =============================================================================

/// Publication status of a catalog item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Ongoing,
    Completed,
    Upcoming,
    Cancelled,
    Hiatus,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Ongoing => "ongoing",
            ItemStatus::Completed => "completed",
            ItemStatus::Upcoming => "upcoming",
            ItemStatus::Cancelled => "cancelled",
            ItemStatus::Hiatus => "hiatus",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ongoing" => Ok(ItemStatus::Ongoing),
            "completed" => Ok(ItemStatus::Completed),
            "upcoming" => Ok(ItemStatus::Upcoming),
            "cancelled" => Ok(ItemStatus::Cancelled),
            "hiatus" => Ok(ItemStatus::Hiatus),
            _ => Err(format!("Invalid item status: {}", s)),
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Canonical Item
// =============================================================================

/// Normalized catalog entry, identified solely by `external_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalItem {
    /// Provider-namespaced ID, e.g. `anilist:30013`
    pub external_id: String,
    pub title: String,
    /// Derived from the title; not unique across items
    pub slug: String,
    pub status: ItemStatus,
    pub chapters: Option<u32>,
    pub description: String,
    pub cover_url: Option<String>,
    /// 0-10 scale
    pub rating: Option<f64>,
    /// Empty when unknown
    pub author: String,
    /// Distinct genre names in provider order
    pub genres: Vec<String>,
    pub last_synced_at: DateTime<Utc>,
    pub last_refresh_check_at: Option<DateTime<Utc>>,
}

impl CanonicalItem {
    /// Validate item data before it reaches the database
    pub fn validate(&self) -> Result<(), String> {
        if self.external_id.trim().is_empty() {
            return Err("Item external ID cannot be empty".to_string());
        }

        if self.title.trim().is_empty() {
            return Err("Item title cannot be empty".to_string());
        }

        if self.slug.is_empty() {
            return Err("Item slug cannot be empty".to_string());
        }

        if let Some(rating) = self.rating {
            if !(0.0..=10.0).contains(&rating) {
                return Err(format!("Item rating {} is out of valid range", rating));
            }
        }

        if self.genres.iter().any(|g| g.trim().is_empty()) {
            return Err("Genre names cannot be empty".to_string());
        }

        Ok(())
    }
}

/// Result of storing an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First time this external ID was stored
    Inserted,
    /// An existing row was overwritten
    Updated,
}
