//! Error types for event delivery.
//!
//! None of these reach a capture call site. They drive retry decisions
//! inside the dispatcher and surface only through `last_error()`, counters
//! and logs.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Delivery failure taxonomy.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Connection to the collector failed.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// The collector did not answer within the transport timeout.
    #[error("request timeout after {timeout_millis}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_millis: u64,
    },

    /// The collector rejected the batch (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// The collector failed to process the batch (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// The collector asked the client to back off (429).
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying
        retry_after_seconds: u64,
        /// Response body content
        body: String,
    },

    /// The batch could not be serialized.
    #[error("serialization failed: {message}")]
    Serialization {
        /// Serializer error message
        message: String,
    },

    /// The delivery queue is at capacity.
    #[error("queue full: capacity {capacity} reached")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// Invalid endpoint or transport configuration.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// The final flush did not finish within the grace period.
    #[error("shutdown flush exceeded {timeout:?}")]
    ShutdownTimeout {
        /// Grace period that was exceeded
        timeout: Duration,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout_millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a rate limit error with retry guidance.
    pub fn rate_limited(retry_after_seconds: u64, body: impl Into<String>) -> Self {
        Self::RateLimited { retry_after_seconds, body: body.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Determines if this error is transient and the batch should be retried.
    ///
    /// Returns `true` for network errors, timeouts, server errors (5xx) and
    /// rate limits. Everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. } => true,

            Self::ClientError { .. }
            | Self::Serialization { .. }
            | Self::QueueFull { .. }
            | Self::ConfigurationError { .. }
            | Self::ShutdownTimeout { .. }
            | Self::InternalError { .. } => false,
        }
    }

    /// Returns the collector's requested retry delay, if it sent one.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds, .. } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    /// HTTP status returned by the collector, if it responded.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code, .. } | Self::ServerError { status_code, .. } => {
                Some(*status_code)
            },
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Response body from the collector, or the error description when the
    /// collector never answered.
    pub fn response_body(&self) -> String {
        match self {
            Self::ClientError { body, .. }
            | Self::ServerError { body, .. }
            | Self::RateLimited { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection reset").is_retryable());
        assert!(DeliveryError::timeout(Duration::from_secs(2)).is_retryable());
        assert!(DeliveryError::server_error(503, "unavailable").is_retryable());
        assert!(DeliveryError::rate_limited(30, "slow down").is_retryable());

        assert!(!DeliveryError::client_error(400, "bad event").is_retryable());
        assert!(!DeliveryError::client_error(401, "bad key").is_retryable());
        assert!(!DeliveryError::serialization("nan").is_retryable());
        assert!(!DeliveryError::configuration("no endpoint").is_retryable());
        assert!(!DeliveryError::QueueFull { capacity: 10 }.is_retryable());
    }

    #[test]
    fn rate_limit_retry_after_extracted() {
        assert_eq!(DeliveryError::rate_limited(120, "").retry_after_seconds(), Some(120));
        assert_eq!(DeliveryError::timeout(Duration::from_secs(2)).retry_after_seconds(), None);
    }

    #[test]
    fn status_and_body_reported() {
        let rejected = DeliveryError::client_error(403, "project disabled");
        assert_eq!(rejected.status_code(), Some(403));
        assert_eq!(rejected.response_body(), "project disabled");

        let network = DeliveryError::network("connection refused");
        assert_eq!(network.status_code(), None);
        assert_eq!(network.response_body(), "network connection failed: connection refused");
    }

    #[test]
    fn error_display_format() {
        assert_eq!(
            DeliveryError::timeout(Duration::from_millis(2000)).to_string(),
            "request timeout after 2000ms"
        );
        assert_eq!(
            DeliveryError::QueueFull { capacity: 1000 }.to_string(),
            "queue full: capacity 1000 reached"
        );
    }
}
