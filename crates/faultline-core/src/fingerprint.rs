//! Stable grouping identity for events.
//!
//! Repeated occurrences of the same fault collapse to one fingerprint: the
//! hash covers the exception class (or message title), the innermost frame's
//! location and the level. Exception messages are left out on purpose since
//! they often embed ids and timestamps.

use sha2::{Digest, Sha256};

use crate::models::{Level, StackFrame};

/// Computes the hex-encoded SHA-256 fingerprint for an event.
pub fn compute(identity: &str, top_frame: Option<&StackFrame>, level: Level) -> String {
    let location = top_frame
        .map(|frame| format!("{}:{}", frame.file, frame.line))
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hasher.update(b"||");
    hasher.update(location.as_bytes());
    hasher.update(b"||");
    hasher.update(level.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_fingerprint() {
        let frame = StackFrame::new("src/db.rs", 42, "connect");
        assert_eq!(
            compute("PoolTimeout", Some(&frame), Level::Error),
            compute("PoolTimeout", Some(&frame), Level::Error)
        );
    }

    #[test]
    fn function_name_does_not_affect_fingerprint() {
        let a = StackFrame::new("src/db.rs", 42, "connect");
        let b = StackFrame::new("src/db.rs", 42, "connect_inner");
        assert_eq!(compute("E", Some(&a), Level::Error), compute("E", Some(&b), Level::Error));
    }

    #[test]
    fn location_and_level_distinguish() {
        let a = StackFrame::new("src/db.rs", 42, "connect");
        let b = StackFrame::new("src/db.rs", 43, "connect");

        assert_ne!(compute("E", Some(&a), Level::Error), compute("E", Some(&b), Level::Error));
        assert_ne!(compute("E", Some(&a), Level::Error), compute("E", Some(&a), Level::Fatal));
        assert_ne!(compute("E", Some(&a), Level::Error), compute("E", None, Level::Error));
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        let fingerprint = compute("title", None, Level::Info);
        assert_eq!(fingerprint.len(), 64);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
