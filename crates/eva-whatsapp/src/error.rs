//! Error types for eva-whatsapp

use thiserror::Error;

/// eva-whatsapp error type
#[derive(Error, Debug)]
pub enum WhatsAppError {
    /// Malformed webhook payload; acknowledged and dropped
    #[error("Invalid webhook payload: {0}")]
    Validation(String),

    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(String),

    #[error("Media fetch failed: {0}")]
    MediaFetch(String),

    /// Outbound send failure; logged, never retried
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Webhook signature verification failed")]
    SignatureVerificationFailed,

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Processing timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error(transparent)]
    Core(#[from] eva_core::Error),
}

impl From<reqwest::Error> for WhatsAppError {
    fn from(err: reqwest::Error) -> Self {
        WhatsAppError::Http(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WhatsAppError>;
