//! Routes host log records into the capture pipeline.
//!
//! Hosts with their own logger hand batches of [`LogRecord`]s to a
//! [`LogRoute`], which filters them and captures the rest as message events.
//! The route also accepts uncaught exceptions and runtime errors.

use chrono::{DateTime, Utc};
use faultline_core::{EventId, ExceptionInfo, Extra, Level, StackFrame, Tags};
use tracing::error;

use crate::client::Client;

/// Category of the pipeline's own log output.
pub const INTERNAL_CATEGORY: &str = "faultline";

/// Marker of log records that carry a formatted exception.
const STACK_TRACE_MARKER: &str = "stack trace:";

/// One record from a host logger.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Log message, possibly multi-line.
    pub message: String,
    /// Severity.
    pub level: Level,
    /// Logger category or target.
    pub category: String,
    /// When the record was logged.
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Creates a record.
    pub fn new(
        message: impl Into<String>,
        level: Level,
        category: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self { message: message.into(), level, category: category.into(), timestamp }
    }
}

/// Filtering options for a [`LogRoute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRouteConfig {
    /// Levels to forward. `None` forwards every level.
    pub levels: Option<Vec<Level>>,
    /// Category whose records are never forwarded.
    pub internal_category: String,
}

impl Default for LogRouteConfig {
    fn default() -> Self {
        Self { levels: None, internal_category: INTERNAL_CATEGORY.to_string() }
    }
}

/// Forwards host log records, exceptions and errors to a [`Client`].
#[derive(Debug, Clone)]
pub struct LogRoute {
    client: Client,
    config: LogRouteConfig,
}

impl LogRoute {
    /// Creates a route over `client`.
    pub fn new(client: Client, config: LogRouteConfig) -> Self {
        Self { client, config }
    }

    /// The client events are captured on.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Returns `true` for the pipeline's own categories.
    ///
    /// Matches the internal category itself, its `::` children and the
    /// `faultline_*` crate targets.
    pub fn is_internal(&self, category: &str) -> bool {
        let internal = self.config.internal_category.as_str();
        match category.strip_prefix(internal) {
            Some(rest) => rest.is_empty() || rest.starts_with("::") || rest.starts_with('_'),
            None => false,
        }
    }

    /// Returns `true` if `level` is forwarded.
    pub fn accepts(&self, level: Level) -> bool {
        match &self.config.levels {
            Some(levels) => levels.contains(&level),
            None => true,
        }
    }

    /// Returns `true` if exceptions and errors should be routed here.
    pub fn handles_errors(&self) -> bool {
        self.accepts(Level::Error)
    }

    /// Captures each eligible record as a message event.
    ///
    /// Records carrying a stack trace, records from the internal category
    /// and records at unlisted levels are skipped. The event title is the
    /// first line of the message with markup tags removed.
    pub fn process_logs(&self, records: &[LogRecord]) -> Vec<EventId> {
        records.iter().filter_map(|record| self.process(record)).collect()
    }

    fn process(&self, record: &LogRecord) -> Option<EventId> {
        if record.message.to_lowercase().contains(STACK_TRACE_MARKER)
            || self.is_internal(&record.category)
            || !self.accepts(record.level)
        {
            return None;
        }

        let first_line = record.message.lines().next().unwrap_or_default();
        let title = strip_tags(first_line);

        let mut extra = Extra::new();
        extra.insert("category".to_string(), record.category.clone().into());

        self.client.capture_message_at(&title, record.level, Tags::new(), extra, record.timestamp)
    }

    /// Captures an uncaught exception.
    pub fn handle_exception(&self, exception: ExceptionInfo) -> Option<EventId> {
        if !self.handles_errors() {
            return None;
        }

        let event_id = self.client.capture_exception(exception, Tags::new(), Extra::new());
        self.report_last_error();
        event_id
    }

    /// Captures a runtime error reported by code, message and location.
    pub fn handle_error(
        &self,
        code: i64,
        message: &str,
        file: &str,
        line: u32,
    ) -> Option<EventId> {
        if !self.handles_errors() {
            return None;
        }

        let exception = ExceptionInfo::new("error", message)
            .with_frames(vec![StackFrame::new(file, line, "")]);
        let mut tags = Tags::new();
        tags.insert("error_code".to_string(), code.to_string());

        let event_id = self.client.capture_exception(exception, tags, Extra::new());
        self.report_last_error();
        event_id
    }

    fn report_last_error(&self) {
        if let Some(last_error) = self.client.last_error() {
            error!(
                target: "faultline",
                status = ?last_error.status,
                body = %last_error.body,
                "collector rejected last delivery"
            );
        }
    }
}

/// Removes `<...>` markup tags from `text`.
///
/// An unterminated `<` drops the rest of the text.
pub fn strip_tags(text: &str) -> String {
    let mut stripped = String::with_capacity(text.len());
    let mut in_tag = false;

    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => stripped.push(ch),
            _ => {},
        }
    }

    stripped
}
