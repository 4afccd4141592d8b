use bridge_traits::error::BridgeError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    /// Server-side or connection failure that may succeed on retry
    #[error("Transient failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// The provider rejected the request; retrying will not help
    #[error("Provider error{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    PermanentApi {
        status: Option<u16>,
        message: String,
    },

    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl MetadataError {
    /// Whether another attempt of the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            MetadataError::Transient { .. } | MetadataError::RateLimited { .. } => true,
            MetadataError::Bridge(e) => e.is_connection_error(),
            _ => false,
        }
    }

    /// Whether the failure is final for this request and not a cancellation
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable() && !matches!(self, MetadataError::Cancelled)
    }

    /// Server-requested delay before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MetadataError::Transient { retry_after, .. }
            | MetadataError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
