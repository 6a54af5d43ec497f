//! Transport error types.

use thiserror::Error;

/// Error type for API transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Server rejected the request with a structured status and message
    #[error("API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// No session is available for an authenticated request
    #[error("Not authenticated")]
    NotAuthenticated,

    /// No refresh token is stored, so an auth failure cannot be recovered
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// Token refresh failed; the session has been cleared
    #[error("Token refresh failed: {0}")]
    RefreshExhausted(String),

    /// Network-layer failure without a structured response.
    /// Never conflated with an authentication failure.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] session_store::StorageError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl TransportError {
    /// Returns true if this error is transient and the request can be
    /// retried: connection failures, timeouts, and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Api { status, .. } => (500..600).contains(status),
            TransportError::Network(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            _ => false,
        }
    }
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;
