//! Error types for Parley
//!
//! This module defines all error types used throughout the client,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Parley operations
///
/// Request/response failures, push-stream problems, session persistence
/// and configuration errors all funnel through this enum. Library functions
/// return [`Result`], which wraps it in `anyhow::Error`; use
/// [`ParleyError::is_authentication`] to recognise the failures that must
/// invalidate the session.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The server rejected the credentials or token (HTTP 401), or no
    /// session is available for an authenticated call
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The request never produced a response (connection refused, DNS,
    /// timeout, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status other than 401
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error detail returned by the server
        message: String,
    },

    /// A push frame could not be decoded or carried no conversation id
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The push connection closed abnormally while its conversation was
    /// still focused
    #[error("Connection lost for chat {chat_id}: {reason}")]
    ConnectionLost {
        /// Conversation the connection was bound to
        chat_id: i64,
        /// Close reason reported by the transport
        reason: String,
    },

    /// Caller supplied an unusable value (blank message, bad id)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Session persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// WebSocket handshake or framing errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl ParleyError {
    /// Returns `true` when `error` wraps a [`ParleyError::Authentication`].
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::error::ParleyError;
    ///
    /// let err: anyhow::Error = ParleyError::Authentication("expired".into()).into();
    /// assert!(ParleyError::is_authentication(&err));
    ///
    /// let err: anyhow::Error = ParleyError::Network("refused".into()).into();
    /// assert!(!ParleyError::is_authentication(&err));
    /// ```
    pub fn is_authentication(error: &anyhow::Error) -> bool {
        matches!(
            error.downcast_ref::<ParleyError>(),
            Some(ParleyError::Authentication(_))
        )
    }
}

/// Result type alias for Parley operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
