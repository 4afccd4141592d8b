//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations.
//!
//! - Traits define the interface the sync engine depends on
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling

pub mod item;

pub use item::{ItemRepository, SqliteItemRepository};
