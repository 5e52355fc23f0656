//! Error types for the keeper engine.
//!
//! The primary error type is `KeeperError`. Synchronous manager and store
//! operations return it directly to the caller. Background jobs never
//! propagate it: the scheduler records the message on the job instead.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Convenience alias used across the engine.
pub type Result<T> = std::result::Result<T, KeeperError>;

/// Errors surfaced by the metadata store, the version manager, the relink
/// resolver and the job scheduler.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// A file, version, tag or project id does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Register was called for a path that is already tracked
    #[error("File already tracked: {}", path.display())]
    AlreadyTracked { path: PathBuf },

    /// The live file is absent when an operation needs it
    #[error("File is missing from disk: {}", path.display())]
    Missing { path: PathBuf },

    /// Hash verification failed
    #[error("Integrity mismatch for {}: expected {expected}, got {actual}", path.display())]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The operation needs a setting that is not configured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A job was dequeued for a type with no registered handler
    #[error("No handler registered for job type {0}")]
    HandlerMissing(String),

    /// Copy, delete or scan failure on a specific path
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Unique path or tag name violated
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Any other SQLite failure
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// Caller supplied an unusable value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The configuration sources could not be read or parsed
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
}

impl KeeperError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        KeeperError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Wrap an `io::Error` with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        KeeperError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<rusqlite::Error> for KeeperError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref code, ref message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                KeeperError::Constraint(
                    message
                        .clone()
                        .unwrap_or_else(|| "constraint failed".to_string()),
                )
            }
            other => KeeperError::Database(other),
        }
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(err: serde_json::Error) -> Self {
        KeeperError::InvalidArgument(format!("malformed JSON: {}", err))
    }
}
