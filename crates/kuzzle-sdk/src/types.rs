//! Core type definitions shared by the dispatcher and the transports.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for request-response correlation.
/// Generated ids use ULID, so they are unique and lexicographically sortable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new unique request ID using ULID.
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// State of the underlying transport. Owned by the transport; the dispatcher
/// only observes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// Ready for traffic.
    Open,
    /// Connection attempt in progress.
    Connecting,
    /// Not connected.
    Closed,
}

impl TransportState {
    /// Check if the transport can carry queries.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the transport is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Connecting => "connecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Dispatcher-side view of the connection, driven by transport notifications.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected (initial state).
    #[default]
    Disconnected,
    /// Transport is connecting.
    Connecting,
    /// Transport is open.
    Connected,
}

impl ConnectionState {
    /// Check if queries may be dispatched.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl From<TransportState> for ConnectionState {
    fn from(state: TransportState) -> Self {
        match state {
            TransportState::Open => Self::Connected,
            TransportState::Connecting => Self::Connecting,
            TransportState::Closed => Self::Disconnected,
        }
    }
}
