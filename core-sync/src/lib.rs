//! # Sync Module
//!
//! Keeps the local catalog in step with a remote provider.
//!
//! ## Overview
//!
//! Three operations run on their own intervals:
//! - **Bulk load**: one-time seeding from the most popular items
//! - **Discovery poll**: items updated since the last successful poll
//! - **Refresh poll**: re-checks stale stored items for chapter changes
//!
//! ## Components
//!
//! - **Sync State** (`state`): per-operation status and cursor with validated transitions
//! - **Repository** (`repository`): SQLite persistence for sync state
//! - **Worker Pool** (`worker_pool`): bounded queue with panic-isolated workers
//! - **Orchestrator** (`orchestrator`): the operations and their scheduler
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  pages   ┌──────────────────┐  tasks  ┌────────────┐
//! │   Provider   │ ───────▶ │ SyncOrchestrator │ ──────▶ │ WorkerPool │
//! └──────────────┘          └──────────────────┘         └────────────┘
//!                                   │                          │
//!                                   ▼                          ▼
//!                          ┌─────────────────┐        ┌────────────────┐
//!                          │ SyncStateRepo   │        │ ItemRepository │
//!                          └─────────────────┘        └────────────────┘
//! ```

pub mod error;
pub mod orchestrator;
pub mod repository;
pub mod state;
pub mod worker_pool;

pub use error::{Result, SyncError};
pub use orchestrator::{
    OperationReport, OrchestratorConfig, SyncOrchestrator, MAX_CONSECUTIVE_PAGE_FAILURES,
};
pub use repository::{SqliteSyncStateRepository, SyncStateRepository};
pub use state::{OperationType, SyncState, SyncStatus};
pub use worker_pool::{PoolError, PoolStats, WorkerPool};
