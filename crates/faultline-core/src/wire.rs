//! JSON wire format for event batches.
//!
//! ```text
//! { "sent_at": "...", "client": "faultline-rust/0.1.0",
//!   "events": [ { "event_id", "title", "message", "level", "timestamp",
//!                 "fingerprint", "tags", "extra",
//!                 "exception": { "type", "value",
//!                                "stacktrace": [ { "filename", "lineno", "function" } ] } } ] }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Event, ExceptionInfo, Extra, Level, StackFrame, Tags};

/// Client identifier sent with every batch.
pub const CLIENT_NAME: &str = concat!("faultline-rust/", env!("CARGO_PKG_VERSION"));

/// A batch of events as transmitted to the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBatch {
    /// When the batch was serialized.
    pub sent_at: DateTime<Utc>,
    /// Sending client identifier.
    pub client: String,
    /// Events in the batch.
    pub events: Vec<WireEvent>,
}

/// A single event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Event identifier in ident form.
    pub event_id: String,
    /// One-line summary.
    pub title: String,
    /// Full message text, for message events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Severity.
    pub level: Level,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Grouping identity.
    pub fingerprint: String,
    /// Event tags.
    #[serde(default)]
    pub tags: Tags,
    /// Event context.
    #[serde(default)]
    pub extra: Extra,
    /// Exception block, for exception events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<WireException>,
}

/// Exception block on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireException {
    /// Exception class.
    #[serde(rename = "type")]
    pub kind: String,
    /// Exception message.
    pub value: String,
    /// Stack frames, innermost first.
    #[serde(default)]
    pub stacktrace: Vec<WireFrame>,
}

/// Stack frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    /// Source file path.
    pub filename: String,
    /// Line number.
    pub lineno: u32,
    /// Function name.
    pub function: String,
}

impl WireBatch {
    /// Builds a batch from events.
    pub fn new<'a>(events: impl IntoIterator<Item = &'a Event>, sent_at: DateTime<Utc>) -> Self {
        Self {
            sent_at,
            client: CLIENT_NAME.to_string(),
            events: events.into_iter().map(WireEvent::from).collect(),
        }
    }

    /// Serializes the batch to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if an `extra` value cannot be serialized.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parses a batch from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid batch document.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if the batch has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl From<&Event> for WireEvent {
    fn from(event: &Event) -> Self {
        Self {
            event_id: event.id().ident(),
            title: event.title(),
            message: event.message().map(str::to_string),
            level: event.level(),
            timestamp: event.timestamp(),
            fingerprint: event.fingerprint().to_string(),
            tags: event.tags().clone(),
            extra: event.extra().clone(),
            exception: event.exception().map(WireException::from),
        }
    }
}

impl From<&ExceptionInfo> for WireException {
    fn from(exception: &ExceptionInfo) -> Self {
        Self {
            kind: exception.class.clone(),
            value: exception.message.clone(),
            stacktrace: exception.frames.iter().map(WireFrame::from).collect(),
        }
    }
}

impl From<&StackFrame> for WireFrame {
    fn from(frame: &StackFrame) -> Self {
        Self { filename: frame.file.clone(), lineno: frame.line, function: frame.function.clone() }
    }
}

impl From<&WireFrame> for StackFrame {
    fn from(frame: &WireFrame) -> Self {
        Self { file: frame.filename.clone(), line: frame.lineno, function: frame.function.clone() }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn exception_block_uses_wire_field_names() {
        let exception = ExceptionInfo::new("KeyError", "missing 'user'")
            .with_frames(vec![StackFrame::new("app/views.rs", 12, "show")]);
        let event = Event::from_exception(
            exception,
            Level::Error,
            Tags::new(),
            Extra::new(),
            Utc::now(),
        )
        .unwrap();

        let value = serde_json::to_value(WireEvent::from(&event)).unwrap();

        assert_eq!(value["level"], "error");
        assert_eq!(value["exception"]["type"], "KeyError");
        assert_eq!(value["exception"]["value"], "missing 'user'");
        assert_eq!(
            value["exception"]["stacktrace"],
            json!([{ "filename": "app/views.rs", "lineno": 12, "function": "show" }])
        );
        assert!(value.get("message").is_none());
    }

    #[test]
    fn message_event_omits_exception_block() {
        let mut tags = Tags::new();
        tags.insert("env".to_string(), "prod".to_string());
        let mut extra = Extra::new();
        extra.insert("category".to_string(), json!("app.db"));

        let event =
            Event::from_message("slow query", Level::Warning, tags, extra, Utc::now()).unwrap();
        let value = serde_json::to_value(WireEvent::from(&event)).unwrap();

        assert_eq!(value["title"], "slow query");
        assert_eq!(value["tags"]["env"], "prod");
        assert_eq!(value["extra"]["category"], "app.db");
        assert!(value.get("exception").is_none());
    }

    #[test]
    fn batch_carries_client_name() {
        let batch = WireBatch::new(std::iter::empty::<&Event>(), Utc::now());
        assert!(batch.client.starts_with("faultline-rust/"));
        assert!(batch.is_empty());
    }
}
