//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Invalid email or password
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// No session is present
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Invalid state transition in the auth FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] session_store::StorageError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] portal_transport::TransportError),
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
