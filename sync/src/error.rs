//! Unified error handling for the sync runtime.
//!
//! Retryable sync failures never surface here: they are handled inside
//! the scheduler via backoff and stay invisible to callers of
//! `record_mutation`. Unrecoverable failures are reported exactly once
//! through the event stream.

use crate::config::ConfigError;
use crate::persist::StorageError;

/// Errors surfaced to callers of the sync runtime.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
