//! Validation errors raised while constructing events.

use thiserror::Error;

/// Result type alias for event construction.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Malformed capture input, rejected before anything is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A message event was captured with no text.
    #[error("message event requires a non-empty message")]
    EmptyMessage,

    /// An exception event was captured with no exception class.
    #[error("exception event requires a non-empty exception class")]
    EmptyExceptionClass,

    /// A level string did not name a known level.
    #[error("unknown level: {value}")]
    UnknownLevel {
        /// The rejected input
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        assert_eq!(
            ValidationError::UnknownLevel { value: "loud".to_string() }.to_string(),
            "unknown level: loud"
        );
        assert_eq!(
            ValidationError::EmptyMessage.to_string(),
            "message event requires a non-empty message"
        );
    }
}
