//! Error types for the trading bot

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Exchange API errors
    #[error("API error: {0}")]
    Api(String),

    #[error("API timeout after {0}ms")]
    ApiTimeout(u64),

    /// The exchange refused to place the order (insufficient funds,
    /// invalid quantity/rate, market halted).
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Cancellation refused. Usually means the order closed between the
    /// last poll and the cancel attempt; callers treat this as success.
    #[error("Cancel failed for order {0}")]
    CancelFailed(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    // Stream errors
    #[error("Stream connection failed: {0}")]
    StreamConnection(String),

    #[error("Stream disconnected")]
    StreamDisconnected,

    // User input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Api(_) | Error::ApiTimeout(_) | Error::StreamDisconnected
        )
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::ApiTimeout(0)
        } else {
            Error::Api(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
