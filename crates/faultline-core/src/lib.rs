//! Core event model for the faultline error pipeline.
//!
//! Provides the immutable [`Event`] type, fingerprinting and the duplicate
//! suppression index, the JSON wire format and the clock abstraction shared
//! by the delivery engine and the capture client.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod time;
pub mod wire;

pub use dedup::DedupIndex;
pub use error::{Result, ValidationError};
pub use models::{Event, EventId, ExceptionInfo, Extra, Level, StackFrame, Tags};
pub use time::{Clock, RealClock, TestClock};
pub use wire::{WireBatch, WireEvent, WireException, WireFrame};
