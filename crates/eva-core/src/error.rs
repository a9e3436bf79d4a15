//! Error types for eva-core

use thiserror::Error;

/// Main error type for eva-core
#[derive(Error, Debug)]
pub enum Error {
    /// Login failed or the upstream rejected the bearer token
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("EVA API error ({status}): {body}")]
    UpstreamApi { status: u16, body: String },

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error should invalidate the cached credential
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

/// Result type alias for eva-core
pub type Result<T> = std::result::Result<T, Error>;
