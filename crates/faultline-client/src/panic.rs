//! Panic capture.

use std::panic;

use faultline_core::{ExceptionInfo, Extra, Level, StackFrame, Tags};

use crate::client::Client;

/// Exception class of captured panics.
pub const PANIC_CLASS: &str = "panic";

/// Installs a panic hook that captures panics as `fatal` events.
///
/// The previously installed hook still runs afterwards. Capture only
/// enqueues the event, so a host that exits on panic should call
/// [`Client::shutdown`] before the process ends.
pub fn install_panic_hook(client: Client) {
    let previous = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());

        let mut exception = ExceptionInfo::new(PANIC_CLASS, message);
        if let Some(location) = info.location() {
            exception =
                exception.with_frames(vec![StackFrame::new(location.file(), location.line(), "")]);
        }

        client.capture_exception_with_level(exception, Level::Fatal, Tags::new(), Extra::new());
        previous(info);
    }));
}
