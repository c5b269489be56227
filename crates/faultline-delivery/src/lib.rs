//! Batched, retrying delivery of captured error events.
//!
//! Events enter a bounded in-memory [`queue::DeliveryQueue`] from the capture
//! path. A single background dispatcher drains it in batches through a
//! [`Transport`], retrying transient failures with exponential backoff.
//!
//! # Architecture
//!
//! 1. **Enqueue** - capture calls push events without awaiting anything
//! 2. **Dispatch** - the dispatcher wakes on a full batch or the interval
//! 3. **Send** - the transport POSTs the batch and classifies the outcome
//! 4. **Apply** - delivered events are discarded, transient failures are
//!    requeued with backoff, rejections are dropped
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use faultline_core::RealClock;
//! use faultline_delivery::{
//!     DeliveryConfig, DeliveryEngine, DeliveryError, Endpoint, HttpTransport,
//! };
//!
//! # async fn example() -> Result<(), DeliveryError> {
//! let endpoint = Endpoint::parse("https://KEY@collector.example/api/events", None)?;
//! let transport = HttpTransport::new(endpoint, Duration::from_secs(2))?;
//! let engine =
//!     DeliveryEngine::new(DeliveryConfig::default(), Arc::new(transport), Arc::new(RealClock));
//!
//! engine.start()?;
//! engine.shutdown(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod queue;
pub mod retry;
pub mod transport;

pub use dispatcher::DeliveryStats;
pub use engine::{DeliveryConfig, DeliveryEngine};
pub use error::{DeliveryError, Result};
pub use queue::{DeliveryItem, DeliveryQueue, DeliveryState};
pub use retry::{RetryContext, RetryDecision, RetryPolicy};
pub use transport::{
    DeliveryResponse, DeliveryResult, Endpoint, HttpTransport, LastError, LastErrorSlot, Transport,
};

/// Default maximum number of delivery attempts per event.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default number of events per batch.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Default delivery queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default HTTP request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MILLIS: u64 = 2000;
