//! # Sync State Machine
//!
//! Persisted progress record for each polling operation.
//!
//! ## Overview
//!
//! There is one [`SyncState`] per [`OperationType`]. The orchestrator moves
//! it through validated transitions and persists it after each one, so the
//! next process picks up where the last left off.
//!
//! ## State Machine
//!
//! ```text
//! NotStarted → Running → Completed
//!                ↑  ↺       │
//!                │  └──→ Failed
//!                └──────────┘ (next invocation)
//! ```
//!
//! `Running → Running` is accepted: a process that died mid-run leaves the
//! row as running and the next start must be able to resume.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let state = repository.get(OperationType::DiscoveryPoll).await?;
//! let state = state.start(clock.now())?;
//! repository.put(&state).await?;
//! // ... run ...
//! let state = state.complete(clock.now(), Some(cursor))?;
//! repository.put(&state).await?;
//! ```

use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Operation Types
// ============================================================================

/// The three polling operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationType {
    /// One-time seeding of the most popular items
    BulkLoad,
    /// Incremental pickup of recently updated items
    DiscoveryPoll,
    /// Periodic re-check of stale items
    RefreshPoll,
}

impl OperationType {
    pub const ALL: [OperationType; 3] = [
        OperationType::BulkLoad,
        OperationType::DiscoveryPoll,
        OperationType::RefreshPoll,
    ];

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::BulkLoad => "bulk-load",
            OperationType::DiscoveryPoll => "discovery-poll",
            OperationType::RefreshPoll => "refresh-poll",
        }
    }
}

impl FromStr for OperationType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bulk-load" => Ok(OperationType::BulkLoad),
            "discovery-poll" => Ok(OperationType::DiscoveryPoll),
            "refresh-poll" => Ok(OperationType::RefreshPoll),
            _ => Err(SyncError::InvalidOperationType(s.to_string())),
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// Status of an operation's most recent run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    /// The operation has never run
    #[default]
    NotStarted,
    /// A run is in progress, or was interrupted
    Running,
    /// The last run finished successfully
    Completed,
    /// The last run failed
    Failed,
}

impl SyncStatus {
    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::NotStarted => "not-started",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "not-started" => Ok(SyncStatus::NotStarted),
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Sync State Entity
// ============================================================================

/// Progress record of one operation type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub operation: OperationType,
    pub status: SyncStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Opaque progress marker; only advanced by a successful run
    pub cursor: Option<String>,
    pub last_error: Option<String>,
}

impl SyncState {
    /// Fresh state for an operation that has never run
    pub fn new(operation: OperationType) -> Self {
        Self {
            operation,
            status: SyncStatus::NotStarted,
            last_run_at: None,
            last_success_at: None,
            cursor: None,
            last_error: None,
        }
    }

    /// Enter `Running`: stamp the run time and clear the last error
    ///
    /// The cursor is left untouched.
    ///
    /// # Errors
    ///
    /// Never fails for the defined statuses; kept fallible so every
    /// transition goes through the same validation.
    pub fn start(mut self, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(SyncStatus::Running)?;
        self.status = SyncStatus::Running;
        self.last_run_at = Some(now);
        self.last_error = None;
        Ok(self)
    }

    /// `Running → Completed` with the operation's new cursor
    ///
    /// # Errors
    ///
    /// Returns an error if the state is not `Running`
    pub fn complete(mut self, now: DateTime<Utc>, cursor: Option<String>) -> Result<Self> {
        self.validate_transition(SyncStatus::Completed)?;
        self.status = SyncStatus::Completed;
        self.last_success_at = Some(now);
        if cursor.is_some() {
            self.cursor = cursor;
        }
        Ok(self)
    }

    /// `Running → Failed`; the cursor keeps its prior value
    ///
    /// # Errors
    ///
    /// Returns an error if the state is not `Running`
    pub fn fail(mut self, error_message: impl Into<String>) -> Result<Self> {
        self.validate_transition(SyncStatus::Failed)?;
        self.status = SyncStatus::Failed;
        self.last_error = Some(error_message.into());
        Ok(self)
    }

    /// Whether the last run ended successfully
    pub fn is_completed(&self) -> bool {
        self.status == SyncStatus::Completed
    }

    /// Validate a state transition
    fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        let valid = match (self.status, to) {
            // Every status may start a new run
            (_, SyncStatus::Running) => true,

            // From Running
            (SyncStatus::Running, SyncStatus::Completed) => true,
            (SyncStatus::Running, SyncStatus::Failed) => true,

            // All other transitions are invalid
            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}
