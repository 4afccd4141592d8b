//! # Catalog Store
//!
//! Owns the local catalog database and the repository used by the sync
//! engine to write into it.
//!
//! ## Overview
//!
//! This crate manages:
//! - SQLite pool creation, pragmas and embedded migrations
//! - The canonical item model shared by every provider
//! - Upsert keyed by external ID, with the genre many-to-many link
//! - Staleness queries driving the refresh poll

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use models::{CanonicalItem, ItemStatus, UpsertOutcome};
pub use repositories::{ItemRepository, SqliteItemRepository};
