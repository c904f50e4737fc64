//! Dispatcher configuration.

use std::time::Duration;

use crate::pending::DEFAULT_MAX_PENDING;

/// Error message the backend uses for an expired authentication token.
pub const TOKEN_EXPIRED_MESSAGE: &str = "Token expired";

/// Configuration for a [`Kuzzle`](crate::Kuzzle) instance.
#[derive(Clone, Debug)]
pub struct KuzzleOptions {
    /// SDK identification sent in every query's `volatile.sdkName`.
    pub sdk_name: String,
    /// Backend error message that signals an expired token.
    pub token_expired_message: String,
    /// Maximum number of queries awaiting a response.
    pub max_pending_queries: usize,
    /// Deadline used by [`Kuzzle::query_and_wait`](crate::Kuzzle::query_and_wait).
    pub default_query_timeout: Duration,
}

impl Default for KuzzleOptions {
    fn default() -> Self {
        Self {
            sdk_name: concat!("rust@", env!("CARGO_PKG_VERSION")).to_string(),
            token_expired_message: TOKEN_EXPIRED_MESSAGE.to_string(),
            max_pending_queries: DEFAULT_MAX_PENDING,
            default_query_timeout: Duration::from_secs(30),
        }
    }
}

impl KuzzleOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SDK name reported to the backend.
    #[must_use]
    pub fn sdk_name(mut self, name: impl Into<String>) -> Self {
        self.sdk_name = name.into();
        self
    }

    /// Set the token expiry error message.
    #[must_use]
    pub fn token_expired_message(mut self, message: impl Into<String>) -> Self {
        self.token_expired_message = message.into();
        self
    }

    /// Set the maximum pending queries.
    #[must_use]
    pub fn max_pending_queries(mut self, max: usize) -> Self {
        self.max_pending_queries = max;
        self
    }

    /// Set the default query timeout.
    #[must_use]
    pub fn default_query_timeout(mut self, timeout: Duration) -> Self {
        self.default_query_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.sdk_name.is_empty() {
            return Err("SDK name cannot be empty".to_string());
        }
        if self.token_expired_message.is_empty() {
            return Err("Token expired message cannot be empty".to_string());
        }
        if self.max_pending_queries == 0 {
            return Err("Max pending queries must be > 0".to_string());
        }
        if self.default_query_timeout.is_zero() {
            return Err("Default query timeout must be > 0".to_string());
        }
        Ok(())
    }
}
