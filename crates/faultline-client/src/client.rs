//! Capture facade.
//!
//! A [`Client`] turns messages and exceptions into events, suppresses
//! duplicates, notifies capture handlers and hands admitted events to the
//! delivery engine. Capture calls are synchronous, never fail and never wait
//! on the network.

use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use faultline_core::{
    Clock, DedupIndex, Event, EventId, ExceptionInfo, Extra, Level, RealClock, Tags,
};
use faultline_delivery::{DeliveryEngine, DeliveryStats, HttpTransport, LastError, Transport};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::{config::ClientConfig, error::ClientError};

/// Observer notified of every admitted event, before it is queued.
pub trait CaptureHandler: Send + Sync {
    /// Called synchronously on the capturing thread. A panic is logged and
    /// does not reach the caller or stop the event.
    fn on_capture(&self, event: &Event);
}

impl<F> CaptureHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_capture(&self, event: &Event) {
        self(event)
    }
}

/// Capture statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Events suppressed as duplicates.
    pub suppressed: u64,
    /// Delivery counters. All zero when capture is disabled.
    pub delivery: DeliveryStats,
}

/// Cheaply cloneable handle to a capture pipeline.
///
/// Construct once at startup and pass clones to wherever errors are
/// captured. The pipeline shuts down when [`Client::shutdown`] is called.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    engine: Option<DeliveryEngine>,
    dedup: DedupIndex,
    clock: Arc<dyn Clock>,
    handlers: RwLock<Vec<Arc<dyn CaptureHandler>>>,
    suppressed: AtomicU64,
}

impl Client {
    /// Validates the configuration and starts delivery over HTTP.
    ///
    /// A disabled configuration yields a client that creates no transport
    /// and no background task.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` for invalid configuration and
    /// `ClientError::Delivery` if the HTTP client cannot be built or no tokio
    /// runtime is available.
    pub fn init(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        if !config.enabled {
            info!("error capture disabled");
            return Ok(Self::build(config, None, Arc::new(RealClock::new())));
        }

        let endpoint = config.endpoint()?;
        info!(endpoint = %endpoint.url(), "error capture enabled");
        let transport = HttpTransport::new(endpoint, config.timeout())?;
        Self::with_transport(config, Arc::new(transport), Arc::new(RealClock::new()))
    }

    /// Builds a client over an injected transport and clock.
    ///
    /// The endpoint is not checked. The transport is discarded unused when
    /// capture is disabled.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` for out-of-range options and
    /// `ClientError::Delivery` when called outside a tokio runtime.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ClientError> {
        config.validate_limits()?;

        if !config.enabled {
            return Ok(Self::build(config, None, clock));
        }

        let engine = DeliveryEngine::new(config.to_delivery_config(), transport, clock.clone());
        engine.start()?;
        Ok(Self::build(config, Some(engine), clock))
    }

    fn build(config: ClientConfig, engine: Option<DeliveryEngine>, clock: Arc<dyn Clock>) -> Self {
        let dedup = DedupIndex::new(config.dedup_cache_size);
        Self {
            inner: Arc::new(ClientInner {
                config,
                engine,
                dedup,
                clock,
                handlers: RwLock::new(Vec::new()),
                suppressed: AtomicU64::new(0),
            }),
        }
    }

    /// Captures a message.
    ///
    /// Returns `None` when capture is disabled or the message is empty. A
    /// suppressed duplicate still returns an id, which is never sent.
    pub fn capture_message(
        &self,
        text: &str,
        level: Level,
        tags: Tags,
        extra: Extra,
    ) -> Option<EventId> {
        self.capture_message_at(text, level, tags, extra, self.now_utc())
    }

    /// Captures a message with an explicit timestamp.
    pub(crate) fn capture_message_at(
        &self,
        text: &str,
        level: Level,
        tags: Tags,
        extra: Extra,
        timestamp: DateTime<Utc>,
    ) -> Option<EventId> {
        if !self.is_enabled() {
            return None;
        }

        match Event::from_message(text, level, self.merge_tags(tags), extra, timestamp) {
            Ok(event) => self.admit(event),
            Err(error) => {
                debug!(error = %error, "ignoring invalid message capture");
                None
            },
        }
    }

    /// Captures an exception at `error` level.
    pub fn capture_exception(
        &self,
        exception: ExceptionInfo,
        tags: Tags,
        extra: Extra,
    ) -> Option<EventId> {
        self.capture_exception_with_level(exception, Level::Error, tags, extra)
    }

    /// Captures an exception at the given level.
    pub fn capture_exception_with_level(
        &self,
        exception: ExceptionInfo,
        level: Level,
        tags: Tags,
        extra: Extra,
    ) -> Option<EventId> {
        if !self.is_enabled() {
            return None;
        }

        let timestamp = self.now_utc();
        match Event::from_exception(exception, level, self.merge_tags(tags), extra, timestamp) {
            Ok(event) => self.admit(event),
            Err(error) => {
                debug!(error = %error, "ignoring invalid exception capture");
                None
            },
        }
    }

    /// Captures any `std::error::Error`, including its source chain.
    pub fn capture_error<E>(&self, error: &E) -> Option<EventId>
    where
        E: std::error::Error + ?Sized,
    {
        self.capture_exception(ExceptionInfo::from_error(error), Tags::new(), Extra::new())
    }

    /// Registers an observer for admitted events.
    pub fn on_capture<H>(&self, handler: H)
    where
        H: CaptureHandler + 'static,
    {
        self.inner.handlers.write().push(Arc::new(handler));
    }

    /// The most recent delivery failure, if the last send failed.
    pub fn last_error(&self) -> Option<LastError> {
        self.inner.engine.as_ref().and_then(DeliveryEngine::last_error)
    }

    /// Returns `true` if events are captured and delivered.
    pub fn is_enabled(&self) -> bool {
        self.inner.engine.is_some()
    }

    /// Snapshot of capture and delivery counters.
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            suppressed: self.inner.suppressed.load(Ordering::Relaxed),
            delivery: self.inner.engine.as_ref().map(DeliveryEngine::stats).unwrap_or_default(),
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Sends everything currently due, bounded by `timeout`.
    ///
    /// Returns the number of events handed to the transport, or `None` if
    /// the flush did not finish in time.
    pub async fn flush(&self, timeout: Duration) -> Option<usize> {
        let Some(engine) = &self.inner.engine else {
            return Some(0);
        };

        match engine.flush(timeout).await {
            Ok(sent) => Some(sent),
            Err(error) => {
                warn!(error = %error, "flush did not complete");
                None
            },
        }
    }

    /// Stops delivery after one final flush, bounded by
    /// `shutdown_grace_millis`. Failures are logged, never returned.
    pub async fn shutdown(&self) {
        if let Some(engine) = &self.inner.engine {
            if let Err(error) = engine.shutdown(self.inner.config.shutdown_grace()).await {
                warn!(error = %error, "error capture shutdown incomplete");
            }
        }
    }

    pub(crate) fn now_utc(&self) -> DateTime<Utc> {
        self.inner.clock.now_utc()
    }

    fn merge_tags(&self, tags: Tags) -> Tags {
        let mut merged = self.inner.config.static_tags.clone();
        merged.extend(tags);
        merged
    }

    fn admit(&self, event: Event) -> Option<EventId> {
        let engine = self.inner.engine.as_ref()?;

        if self.inner.dedup.should_suppress(
            event.fingerprint(),
            self.inner.clock.now(),
            self.inner.config.dedup_window(),
        ) {
            self.inner.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = event.fingerprint(), "duplicate event suppressed");
            return Some(EventId::new());
        }

        let handlers = self.inner.handlers.read().clone();
        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler.on_capture(&event))).is_err() {
                error!(
                    target: "faultline",
                    event_id = %event.id(),
                    "capture handler panicked"
                );
            }
        }

        let event_id = event.id();
        debug!(event_id = %event_id, level = %event.level(), "event captured");
        // QueueFull is logged and counted by the engine.
        let _ = engine.enqueue(event);
        Some(event_id)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("enabled", &self.is_enabled())
            .field("handlers", &self.inner.handlers.read().len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use faultline_core::{StackFrame, TestClock};
    use faultline_delivery::transport::mock::MockTransport;
    use serial_test::serial;

    use super::*;

    fn config() -> ClientConfig {
        ClientConfig { batch_size: 100, batch_interval_millis: 60_000, ..Default::default() }
    }

    fn client_with(config: ClientConfig) -> (Client, Arc<MockTransport>, TestClock) {
        let transport = Arc::new(MockTransport::new());
        let clock = TestClock::new();
        let client =
            Client::with_transport(config, transport.clone(), Arc::new(clock.clone())).unwrap();
        (client, transport, clock)
    }

    fn exception(message: &str) -> ExceptionInfo {
        ExceptionInfo::new("TimeoutError", message)
            .with_frames(vec![StackFrame::new("src/db.rs", 88, "query")])
    }

    #[tokio::test]
    async fn disabled_client_captures_nothing() {
        let transport = Arc::new(MockTransport::new());
        let config = ClientConfig { enabled: false, ..config() };
        let client =
            Client::with_transport(config, transport.clone(), Arc::new(RealClock::new())).unwrap();

        assert!(!client.is_enabled());
        assert_eq!(client.capture_message("x", Level::Error, Tags::new(), Extra::new()), None);
        assert_eq!(client.flush(Duration::from_secs(1)).await, Some(0));
        client.shutdown().await;
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn disabled_client_needs_no_runtime() {
        let client = Client::init(ClientConfig { enabled: false, ..Default::default() }).unwrap();
        assert!(!client.is_enabled());
        assert_eq!(client.last_error(), None);
    }

    #[test]
    fn enabled_client_outside_runtime_fails() {
        let config = ClientConfig {
            endpoint: Some("https://key@collector.example/api".to_string()),
            ..Default::default()
        };
        assert!(matches!(Client::init(config), Err(ClientError::Delivery(_))));
    }

    #[tokio::test]
    async fn duplicates_within_window_are_suppressed() {
        let (client, transport, clock) = client_with(config());

        let first = client.capture_exception(exception("after 2s"), Tags::new(), Extra::new());
        let second = client.capture_exception(exception("after 3s"), Tags::new(), Extra::new());
        assert!(first.is_some() && second.is_some());
        assert_ne!(first, second);

        client.flush(Duration::from_secs(1)).await;
        assert_eq!(transport.events().len(), 1);
        assert_eq!(client.stats().suppressed, 1);

        clock.advance(Duration::from_secs(61));
        client.capture_exception(exception("after 4s"), Tags::new(), Extra::new());
        client.flush(Duration::from_secs(1)).await;
        assert_eq!(transport.events().len(), 2);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn static_tags_are_overridden_by_call_tags() {
        let mut static_tags = Tags::new();
        static_tags.insert("env".to_string(), "prod".to_string());
        static_tags.insert("region".to_string(), "eu".to_string());
        let (client, transport, _clock) = client_with(ClientConfig { static_tags, ..config() });

        let mut tags = Tags::new();
        tags.insert("env".to_string(), "canary".to_string());
        client.capture_message("deploy failed", Level::Error, tags, Extra::new());
        client.flush(Duration::from_secs(1)).await;

        let sent = &transport.events()[0];
        assert_eq!(sent.tags.get("env").map(String::as_str), Some("canary"));
        assert_eq!(sent.tags.get("region").map(String::as_str), Some("eu"));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn handlers_see_admitted_events_only() {
        let (client, _transport, _clock) = client_with(config());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.on_capture(move |event: &Event| sink.lock().push(event.title()));

        client.capture_message("cache miss storm", Level::Warning, Tags::new(), Extra::new());
        client.capture_message("cache miss storm", Level::Warning, Tags::new(), Extra::new());

        assert_eq!(*seen.lock(), vec!["cache miss storm".to_string()]);
        client.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn panicking_handler_does_not_stop_capture() {
        let (client, transport, _clock) = client_with(config());
        client.on_capture(|_: &Event| panic!("observer failed"));
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        client.on_capture(move |_: &Event| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let captured = catch_unwind(AssertUnwindSafe(|| {
            client.capture_message("disk full", Level::Error, Tags::new(), Extra::new())
        }));

        assert!(matches!(captured, Ok(Some(_))), "capture must not unwind");
        assert_eq!(seen.load(Ordering::Relaxed), 1);
        assert_eq!(client.flush(Duration::from_secs(1)).await, Some(1));
        assert_eq!(transport.events()[0].title, "disk full");
        client.shutdown().await;
    }

    #[tokio::test]
    async fn empty_message_returns_none() {
        let (client, transport, _clock) = client_with(config());

        assert_eq!(client.capture_message("   ", Level::Info, Tags::new(), Extra::new()), None);
        client.flush(Duration::from_secs(1)).await;
        assert_eq!(transport.call_count(), 0);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn capture_error_uses_source_chain() {
        let (client, transport, _clock) = client_with(config());
        let error = std::io::Error::new(std::io::ErrorKind::NotFound, "config missing");

        client.capture_error(&error).unwrap();
        client.flush(Duration::from_secs(1)).await;

        let exception = transport.events()[0].exception.clone().unwrap();
        assert!(exception.kind.starts_with("std::io::"), "type name: {}", exception.kind);
        assert_eq!(exception.value, "config missing");
        client.shutdown().await;
    }

    #[tokio::test]
    async fn queue_full_still_returns_id() {
        let (client, _transport, _clock) =
            client_with(ClientConfig { queue_capacity: 1, ..config() });

        client.capture_message("first", Level::Error, Tags::new(), Extra::new()).unwrap();
        let dropped = client.capture_message("second", Level::Error, Tags::new(), Extra::new());

        assert!(dropped.is_some());
        assert_eq!(client.stats().delivery.dropped_queue_full, 1);
        client.shutdown().await;
    }
}
