//! Catalog item repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{CanonicalItem, ItemStatus, UpsertOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, FromRow, Sqlite, SqlitePool, Transaction};
use tracing::debug;

/// Item repository interface used by the sync engine
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Insert or overwrite an item keyed by its external ID
    ///
    /// Genres are replaced wholesale. The write is a single transaction.
    ///
    /// # Errors
    /// Returns error if:
    /// - Item validation fails
    /// - Database error occurs
    async fn upsert(&self, item: &CanonicalItem) -> Result<UpsertOutcome>;

    /// Find an item by its external ID
    ///
    /// # Returns
    /// - `Ok(Some(item))` if found
    /// - `Ok(None)` if not found
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<CanonicalItem>>;

    /// Items never refresh-checked or last checked before `cutoff`
    ///
    /// Never-checked items come first, then the oldest checks.
    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<CanonicalItem>>;

    /// Stamp the last refresh check time of an item
    ///
    /// # Errors
    /// Returns `NotFound` if no item has this external ID
    async fn mark_refresh_checked(&self, external_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Count stored items
    async fn count(&self) -> Result<i64>;
}

// ============================================================================
// Database Row Mapping
// ============================================================================

#[derive(Debug, FromRow)]
struct ItemRow {
    id: i64,
    external_id: String,
    title: String,
    slug: String,
    status: String,
    chapters: Option<i64>,
    description: String,
    cover_url: Option<String>,
    rating: Option<f64>,
    author: String,
    last_synced_at: i64,
    last_refresh_check_at: Option<i64>,
}

fn invalid_column(field: &str, message: impl Into<String>) -> LibraryError {
    LibraryError::InvalidInput {
        field: field.to_string(),
        message: message.into(),
    }
}

fn from_timestamp(field: &str, secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| invalid_column(field, format!("timestamp {} out of range", secs)))
}

impl TryFrom<ItemRow> for CanonicalItem {
    type Error = LibraryError;

    fn try_from(row: ItemRow) -> Result<Self> {
        let status: ItemStatus = row
            .status
            .parse()
            .map_err(|e: String| invalid_column("status", e))?;

        let chapters = row
            .chapters
            .map(u32::try_from)
            .transpose()
            .map_err(|e| invalid_column("chapters", e.to_string()))?;

        let last_refresh_check_at = row
            .last_refresh_check_at
            .map(|secs| from_timestamp("last_refresh_check_at", secs))
            .transpose()?;

        Ok(CanonicalItem {
            external_id: row.external_id,
            title: row.title,
            slug: row.slug,
            status,
            chapters,
            description: row.description,
            cover_url: row.cover_url,
            rating: row.rating,
            author: row.author,
            genres: Vec::new(),
            last_synced_at: from_timestamp("last_synced_at", row.last_synced_at)?,
            last_refresh_check_at,
        })
    }
}

const SELECT_ITEM: &str = r#"
    SELECT id, external_id, title, slug, status, chapters, description,
           cover_url, rating, author, last_synced_at, last_refresh_check_at
    FROM items
"#;

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of ItemRepository
pub struct SqliteItemRepository {
    pool: SqlitePool,
}

impl SqliteItemRepository {
    /// Create a new SqliteItemRepository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_genres(&self, item_id: i64) -> Result<Vec<String>> {
        let names = query_as::<_, (String,)>(
            r#"
            SELECT g.name FROM item_genres ig
            INNER JOIN genres g ON g.id = ig.genre_id
            WHERE ig.item_id = ?
            ORDER BY ig.position ASC
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    async fn hydrate(&self, row: ItemRow) -> Result<CanonicalItem> {
        let id = row.id;
        let mut item = CanonicalItem::try_from(row)?;
        item.genres = self.load_genres(id).await?;
        Ok(item)
    }

    async fn replace_genres(
        tx: &mut Transaction<'_, Sqlite>,
        item_id: i64,
        genres: &[String],
    ) -> Result<()> {
        query("DELETE FROM item_genres WHERE item_id = ?")
            .bind(item_id)
            .execute(&mut **tx)
            .await?;

        for (position, name) in genres.iter().enumerate() {
            query("INSERT INTO genres (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
                .bind(name)
                .execute(&mut **tx)
                .await?;

            let (genre_id,): (i64,) = query_as("SELECT id FROM genres WHERE name = ?")
                .bind(name)
                .fetch_one(&mut **tx)
                .await?;

            query(
                "INSERT OR IGNORE INTO item_genres (item_id, genre_id, position) VALUES (?, ?, ?)",
            )
            .bind(item_id)
            .bind(genre_id)
            .bind(position as i64)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl ItemRepository for SqliteItemRepository {
    async fn upsert(&self, item: &CanonicalItem) -> Result<UpsertOutcome> {
        item.validate().map_err(|e| LibraryError::InvalidInput {
            field: "CanonicalItem".to_string(),
            message: e,
        })?;

        let now = Utc::now().timestamp();

        // Write before reading: WAL refuses to upgrade a read snapshot to a
        // write lock, while a first write waits out the busy timeout.
        let mut tx = self.pool.begin().await?;

        let inserted = query(
            r#"
            INSERT INTO items (
                external_id, title, slug, status, chapters, description,
                cover_url, rating, author, last_synced_at, last_refresh_check_at,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO NOTHING
            "#,
        )
        .bind(&item.external_id)
        .bind(&item.title)
        .bind(&item.slug)
        .bind(item.status.as_str())
        .bind(item.chapters.map(i64::from))
        .bind(&item.description)
        .bind(&item.cover_url)
        .bind(item.rating)
        .bind(&item.author)
        .bind(item.last_synced_at.timestamp())
        .bind(item.last_refresh_check_at.map(|at| at.timestamp()))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            query(
                r#"
                UPDATE items SET
                    title = ?,
                    slug = ?,
                    status = ?,
                    chapters = ?,
                    description = ?,
                    cover_url = ?,
                    rating = ?,
                    author = ?,
                    last_synced_at = ?,
                    last_refresh_check_at = COALESCE(?, last_refresh_check_at),
                    updated_at = ?
                WHERE external_id = ?
                "#,
            )
            .bind(&item.title)
            .bind(&item.slug)
            .bind(item.status.as_str())
            .bind(item.chapters.map(i64::from))
            .bind(&item.description)
            .bind(&item.cover_url)
            .bind(item.rating)
            .bind(&item.author)
            .bind(item.last_synced_at.timestamp())
            .bind(item.last_refresh_check_at.map(|at| at.timestamp()))
            .bind(now)
            .bind(&item.external_id)
            .execute(&mut *tx)
            .await?;
        }

        let (item_id,): (i64,) = query_as("SELECT id FROM items WHERE external_id = ?")
            .bind(&item.external_id)
            .fetch_one(&mut *tx)
            .await?;

        Self::replace_genres(&mut tx, item_id, &item.genres).await?;
        tx.commit().await?;

        let outcome = if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        };

        debug!(
            external_id = %item.external_id,
            outcome = ?outcome,
            genres = item.genres.len(),
            "Stored catalog item"
        );

        Ok(outcome)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<CanonicalItem>> {
        let row = query_as::<_, ItemRow>(&format!("{} WHERE external_id = ?", SELECT_ITEM))
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<CanonicalItem>> {
        let rows = query_as::<_, ItemRow>(&format!(
            r#"{}
            WHERE last_refresh_check_at IS NULL OR last_refresh_check_at < ?
            ORDER BY last_refresh_check_at IS NOT NULL, last_refresh_check_at ASC, id ASC
            LIMIT ?
            "#,
            SELECT_ITEM
        ))
        .bind(cutoff.timestamp())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(self.hydrate(row).await?);
        }

        Ok(items)
    }

    async fn mark_refresh_checked(&self, external_id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = query(
            "UPDATE items SET last_refresh_check_at = ?, updated_at = ? WHERE external_id = ?",
        )
        .bind(at.timestamp())
        .bind(Utc::now().timestamp())
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "Item".to_string(),
                id: external_id.to_string(),
            });
        }

        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
