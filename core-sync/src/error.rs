use crate::worker_pool::PoolError;
use core_library::LibraryError;
use core_metadata::MetadataError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid operation type: {0}")]
    InvalidOperationType(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("{operation} gave up after {consecutive} consecutive failed pages")]
    TooManyPageFailures { operation: String, consecutive: u32 },

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),
}

impl SyncError {
    /// Whether the error came from cancellation anywhere in the stack
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SyncError::Cancelled
                | SyncError::Metadata(MetadataError::Cancelled)
                | SyncError::Pool(PoolError::Cancelled)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
