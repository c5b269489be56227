//! Error capture for applications.
//!
//! Build a [`Client`] from a [`ClientConfig`] once at startup, then capture
//! messages, exceptions and errors through it. Events are fingerprinted,
//! duplicates are suppressed and the rest are delivered in the background.
//!
//! Host integrations:
//! - [`Client::on_capture`] for observers of every admitted event
//! - [`LogRoute`] for batches of records from a host logger
//! - [`CaptureLayer`] for `tracing` events
//! - [`install_panic_hook`] for panics
//!
//! # Example
//!
//! ```no_run
//! use faultline_client::{Client, ClientConfig};
//! use faultline_core::{Extra, Level, Tags};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::init(ClientConfig::load()?)?;
//! let event_id = client.capture_message("disk full", Level::Error, Tags::new(), Extra::new());
//! if let Some(event_id) = event_id {
//!     println!("reported as {}", event_id.ident());
//! }
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod layer;
pub mod log_route;
pub mod panic;

pub use client::{CaptureHandler, Client, ClientStats};
pub use config::ClientConfig;
pub use error::{ClientError, ConfigError};
pub use layer::CaptureLayer;
pub use log_route::{strip_tags, LogRecord, LogRoute, LogRouteConfig};
pub use panic::install_panic_hook;
