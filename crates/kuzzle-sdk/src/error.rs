//! Error handling for query dispatch and the transport layer.

use std::{string::FromUtf8Error, time::Duration};

use thiserror::Error;

use crate::types::RequestId;

/// The main result type used throughout the SDK.
pub type KuzzleResult<T> = Result<T, KuzzleError>;

/// Comprehensive error type for all SDK operations.
///
/// Errors are `Clone` because a single settled query outcome is handed to
/// every task awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KuzzleError {
    /// A query was issued while the transport was not open.
    #[error("Not connected to Kuzzle")]
    NotConnected,

    /// A request id was inserted while another query with the same id was
    /// still pending.
    #[error("Duplicate operation: request {request_id} is already pending")]
    DuplicateOperation { request_id: RequestId },

    /// The connection dropped before a response arrived.
    #[error("Connection lost{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    ConnectionLost { reason: Option<String> },

    /// Error reported by the backend in a response envelope.
    #[error("API error: status={status}, message={message}")]
    Api { status: u16, message: String },

    /// Too many queries awaiting a response.
    #[error("Capacity exceeded: {message}")]
    CapacityExceeded { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// WebSocket errors
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal errors, usually a misuse of the query API.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<serde_json::Error> for KuzzleError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<FromUtf8Error> for KuzzleError {
    fn from(e: FromUtf8Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for KuzzleError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket {
            message: e.to_string(),
        }
    }
}

impl KuzzleError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an API error from a backend error object.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a connection-lost error.
    pub fn connection_lost(reason: Option<String>) -> Self {
        Self::ConnectionLost { reason }
    }

    /// Create a capacity exceeded error.
    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Backend status code, if this error came from a response envelope.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
