//! # Sync State Repository
//!
//! Persistence for [`SyncState`] rows, one per operation type.
//!
//! Rows are created lazily: [`SyncStateRepository::get`] returns a fresh
//! `not-started` state when nothing is stored yet, and the first
//! [`SyncStateRepository::put`] inserts it.

use crate::state::{OperationType, SyncState, SyncStatus};
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for sync state persistence
#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Load the state of an operation
    ///
    /// Returns a `not-started` state if the operation never persisted one.
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails or the row is corrupt
    async fn get(&self, operation: OperationType) -> Result<SyncState>;

    /// Insert or replace the state of an operation
    ///
    /// # Errors
    ///
    /// Returns error if the database write fails
    async fn put(&self, state: &SyncState) -> Result<()>;

    /// Load every persisted state
    async fn list(&self) -> Result<Vec<SyncState>>;
}

// ============================================================================
// Database Row Mapping
// ============================================================================

#[derive(Debug, FromRow)]
struct SyncStateRow {
    operation_type: String,
    status: String,
    last_run_at: Option<i64>,
    last_success_at: Option<i64>,
    cursor: Option<String>,
    last_error: Option<String>,
}

fn timestamp(secs: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    secs.map(|s| {
        DateTime::from_timestamp(s, 0)
            .ok_or_else(|| SyncError::Database(format!("Invalid timestamp: {}", s)))
    })
    .transpose()
}

impl TryFrom<SyncStateRow> for SyncState {
    type Error = SyncError;

    fn try_from(row: SyncStateRow) -> Result<Self> {
        let operation: OperationType = row.operation_type.parse()?;
        let status: SyncStatus = row.status.parse()?;

        Ok(SyncState {
            operation,
            status,
            last_run_at: timestamp(row.last_run_at)?,
            last_success_at: timestamp(row.last_success_at)?,
            cursor: row.cursor,
            last_error: row.last_error,
        })
    }
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of SyncStateRepository
pub struct SqliteSyncStateRepository {
    pool: SqlitePool,
}

impl SqliteSyncStateRepository {
    /// Create a new repository instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStateRepository for SqliteSyncStateRepository {
    async fn get(&self, operation: OperationType) -> Result<SyncState> {
        let row = sqlx::query_as::<_, SyncStateRow>(
            r#"
            SELECT operation_type, status, last_run_at, last_success_at, cursor, last_error
            FROM sync_state
            WHERE operation_type = ?
            "#,
        )
        .bind(operation.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        match row {
            Some(row) => SyncState::try_from(row),
            None => Ok(SyncState::new(operation)),
        }
    }

    async fn put(&self, state: &SyncState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (
                operation_type, status, last_run_at, last_success_at,
                cursor, last_error, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(operation_type) DO UPDATE SET
                status = excluded.status,
                last_run_at = excluded.last_run_at,
                last_success_at = excluded.last_success_at,
                cursor = excluded.cursor,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.operation.as_str())
        .bind(state.status.as_str())
        .bind(state.last_run_at.map(|at| at.timestamp()))
        .bind(state.last_success_at.map(|at| at.timestamp()))
        .bind(&state.cursor)
        .bind(&state.last_error)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncState>> {
        let rows = sqlx::query_as::<_, SyncStateRow>(
            r#"
            SELECT operation_type, status, last_run_at, last_success_at, cursor, last_error
            FROM sync_state
            ORDER BY operation_type ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter().map(SyncState::try_from).collect()
    }
}
