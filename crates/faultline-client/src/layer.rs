//! `tracing` integration.
//!
//! [`CaptureLayer`] forwards `tracing` events at or above a minimum level
//! through a [`LogRoute`], so `warn!` and `error!` calls become captured
//! events without any host-specific glue.

use std::fmt;

use faultline_core::Level;
use tracing::{
    field::{Field, Visit},
    Subscriber,
};
use tracing_subscriber::{layer::Context, Layer};

use crate::log_route::{LogRecord, LogRoute};

/// `tracing_subscriber` layer that captures log events.
#[derive(Debug, Clone)]
pub struct CaptureLayer {
    route: LogRoute,
    min_level: tracing::Level,
}

impl CaptureLayer {
    /// Captures `WARN` and `ERROR` events through `route`.
    pub fn new(route: LogRoute) -> Self {
        Self { route, min_level: tracing::Level::WARN }
    }

    /// Sets the least severe level that is captured.
    #[must_use]
    pub fn with_min_level(mut self, min_level: tracing::Level) -> Self {
        self.min_level = min_level;
        self
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // More verbose levels compare greater.
        if *metadata.level() > self.min_level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let Some(message) = visitor.message else {
            return;
        };

        let record = LogRecord::new(
            message,
            map_level(*metadata.level()),
            metadata.target(),
            self.route.client().now_utc(),
        );
        self.route.process_logs(std::slice::from_ref(&record));
    }
}

fn map_level(level: tracing::Level) -> Level {
    match level {
        tracing::Level::ERROR => Level::Error,
        tracing::Level::WARN => Level::Warning,
        tracing::Level::INFO => Level::Info,
        _ => Level::Debug,
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}
