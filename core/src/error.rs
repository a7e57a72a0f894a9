//! Error types for the Geocaching API client.
//!
//! # Design
//! Transport failures and server-signalled throttling are retryable and are
//! only surfaced after the retry budget for their class is exhausted.
//! `ConnectionTimeout` is the deadline-exceeded specialization of
//! `Connection`; `is_connection` treats both as one class. Every other variant
//! is terminal and reaches the caller on first occurrence.

use serde_json::Value;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GeocachingError>;

/// Errors returned by `GeocachingClient` and its helpers.
#[derive(Debug, Error)]
pub enum GeocachingError {
    /// Transport-level failure: connect error, DNS failure, reset connection.
    #[error("error occurred while communicating with the Geocaching API: {0}")]
    Connection(String),

    /// The per-request deadline elapsed before a response arrived.
    #[error("timeout occurred while connecting to the Geocaching API")]
    ConnectionTimeout,

    /// The server answered 429.
    #[error("rate limit error has occurred with the Geocaching API")]
    RateLimit,

    /// The server answered with a 4xx/5xx status other than 429.
    ///
    /// `body` is the decoded JSON error document, or `{"message": <raw text>}`
    /// when the response was not JSON.
    #[error("Geocaching API returned HTTP {status}: {body}")]
    Api { status: u16, body: Value },

    /// The request could not be built: malformed URL or header.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A response body did not have the expected shape.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The client could not be constructed from the supplied options.
    #[error("invalid client configuration: {0}")]
    Config(String),

    /// The token-refresh callback failed.
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),
}

impl GeocachingError {
    /// True for `Connection` and its `ConnectionTimeout` specialization.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            GeocachingError::Connection(_) | GeocachingError::ConnectionTimeout
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GeocachingError::ConnectionTimeout)
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GeocachingError::RateLimit)
    }

    /// Whether the executor retries this error internally.
    ///
    /// A retryable error seen by a caller therefore means the retry budget
    /// was exhausted; anything else is a terminal failure.
    pub fn is_retryable(&self) -> bool {
        self.is_connection() || self.is_rate_limit()
    }

    /// HTTP status carried by an `Api` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            GeocachingError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
