//! Custom error types for the photo backup engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown media provider {name:?} (available: {})", available.join(", "))]
    UnknownProvider { name: String, available: Vec<String> },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider API error (status {status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Pagination did not terminate after {pages} pages")]
    PaginationExhausted { pages: usize },

    #[error("Cannot plan destination path: {0}")]
    PathPlanning(String),

    #[error("Items {first_id} and {second_id} both map to {}", path.display())]
    PathCollision {
        path: PathBuf,
        first_id: String,
        second_id: String,
    },

    #[error("Manifest {} is corrupt: {reason}", path.display())]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("Unknown manifest record: {0}")]
    UnknownRecord(String),

    #[error("Duplicate manifest record: {0}")]
    DuplicateRecord(String),

    #[error("Unsupported manifest version {0}")]
    UnsupportedManifestVersion(u32),

    #[error("Partial write to {}: {reason}", path.display())]
    PartialWrite { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl BackupError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackupError::Network(_) | BackupError::Timeout(_) | BackupError::PartialWrite { .. } => {
                true
            }
            BackupError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.is_body()
                    || e
                        .status()
                        .is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
            }
            BackupError::Provider { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
