//! Canonical event model and strongly-typed identifiers.
//!
//! An [`Event`] is built once by one of its two constructors and never
//! mutated afterwards. Tag merging, level selection and timestamps are all
//! resolved by the caller before construction.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{Result, ValidationError},
    fingerprint,
};

/// Tags attached to an event. Keys are unique; the last insert wins.
pub type Tags = BTreeMap<String, String>;

/// Free-form context attached to an event.
pub type Extra = BTreeMap<String, serde_json::Value>;

/// Strongly-typed event identifier.
///
/// # Example
///
/// ```
/// use faultline_core::models::EventId;
/// let id = EventId::new();
/// assert_eq!(id.ident().len(), 32);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the searchable form of this ID: 32 lowercase hex characters.
    pub fn ident(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Severity of a captured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Diagnostic detail.
    Debug,
    /// Informational message.
    Info,
    /// Something unexpected that did not fail.
    Warning,
    /// A failure.
    Error,
    /// A failure the process cannot recover from.
    Fatal,
}

impl Level {
    /// Returns the lowercase wire name of this level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ValidationError;

    /// Parses a level name, accepting the aliases host loggers commonly use.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" | "profile" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "fatal" | "critical" => Ok(Self::Fatal),
            _ => Err(ValidationError::UnknownLevel { value: s.to_string() }),
        }
    }
}

/// One frame of a stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Source file path.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// Function or method name.
    pub function: String,
}

impl StackFrame {
    /// Creates a stack frame.
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self { file: file.into(), line, function: function.into() }
    }
}

/// Exception details for exception-type events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Exception type name.
    pub class: String,
    /// Exception message.
    pub message: String,
    /// Stack frames, innermost first.
    pub frames: Vec<StackFrame>,
}

impl ExceptionInfo {
    /// Creates exception details without a stack trace.
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self { class: class.into(), message: message.into(), frames: Vec::new() }
    }

    /// Attaches stack frames, innermost first.
    #[must_use]
    pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.frames = frames;
        self
    }

    /// Builds exception details from any error value.
    ///
    /// The class is the error's type name. The message is the error's
    /// display text followed by one `Caused by:` line per source.
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str("\nCaused by: ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        Self::new(std::any::type_name::<E>(), message)
    }

    /// Returns the innermost stack frame, if any.
    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.frames.first()
    }
}

/// A captured occurrence, ready to be fingerprinted and queued.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: EventId,
    message: Option<String>,
    exception: Option<ExceptionInfo>,
    level: Level,
    timestamp: DateTime<Utc>,
    tags: Tags,
    extra: Extra,
    fingerprint: String,
}

impl Event {
    /// Builds a message event.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyMessage` if `text` is blank.
    pub fn from_message(
        text: impl Into<String>,
        level: Level,
        tags: Tags,
        extra: Extra,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }

        let fingerprint = fingerprint::compute(first_line(&text), None, level);

        Ok(Self {
            id: EventId::new(),
            message: Some(text),
            exception: None,
            level,
            timestamp,
            tags,
            extra,
            fingerprint,
        })
    }

    /// Builds an exception event.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyExceptionClass` if the exception has
    /// no class name.
    pub fn from_exception(
        exception: ExceptionInfo,
        level: Level,
        tags: Tags,
        extra: Extra,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        if exception.class.trim().is_empty() {
            return Err(ValidationError::EmptyExceptionClass);
        }

        let fingerprint = fingerprint::compute(&exception.class, exception.top_frame(), level);

        Ok(Self {
            id: EventId::new(),
            message: None,
            exception: Some(exception),
            level,
            timestamp,
            tags,
            extra,
            fingerprint,
        })
    }

    /// Event identifier.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Full message text for message events.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Exception details for exception events.
    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    /// Severity level.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Capture time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Event tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Event context.
    pub fn extra(&self) -> &Extra {
        &self.extra
    }

    /// Derived grouping identity.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// One-line summary of the event.
    ///
    /// Message events use the first line of the message. Exception events use
    /// `"{class}: {first line of message}"`, or the class alone.
    pub fn title(&self) -> String {
        match (&self.exception, &self.message) {
            (Some(exception), _) => {
                let summary = first_line(&exception.message);
                if summary.is_empty() {
                    exception.class.clone()
                } else {
                    format!("{}: {summary}", exception.class)
                }
            },
            (None, Some(message)) => first_line(message).to_string(),
            (None, None) => String::new(),
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim_end()
}
