//! Application error types and result alias.

use thiserror::Error;

use crate::chain::ChainError;

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict error (e.g., concurrent chain derivation for one source)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Storage backend unreachable after bounded retries
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Snapshot capture failed; recorded on the backup row as `failed`
    #[error("Snapshot capture failed: {0}")]
    SnapshotCaptureFailed(String),

    /// Chain structure violation (broken link, unreachable restore target)
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
