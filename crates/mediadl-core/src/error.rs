//! Error types for mediadl core

use thiserror::Error;

/// Errors that can occur in mediadl core
#[derive(Debug, Error)]
pub enum MediaDlError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download not found: {0}")]
    NotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported record schema version {0}")]
    Migration(u32),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for MediaDlError {
    fn from(error: serde_json::Error) -> Self {
        MediaDlError::Serialization(error.to_string())
    }
}

impl From<url::ParseError> for MediaDlError {
    fn from(error: url::ParseError) -> Self {
        MediaDlError::InvalidUrl(error.to_string())
    }
}

impl From<MediaDlError> for String {
    fn from(error: MediaDlError) -> Self {
        error.to_string()
    }
}
