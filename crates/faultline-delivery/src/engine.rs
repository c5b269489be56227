//! Delivery engine: queue, dispatcher task and shutdown coordination.

use std::{sync::Arc, time::Duration};

use faultline_core::{Clock, Event};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    dispatcher::{DeliveryCounters, DeliveryStats, Dispatcher},
    error::{DeliveryError, Result},
    queue::DeliveryQueue,
    retry::RetryPolicy,
    transport::{LastError, LastErrorSlot, Transport},
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Maximum number of queued events.
    pub queue_capacity: usize,

    /// Events per batch, and the ready count that triggers an early send.
    pub batch_size: usize,

    /// Longest time a ready event waits before being sent.
    pub batch_interval: Duration,

    /// Backoff for transient failures.
    pub retry_policy: RetryPolicy,

    /// Upper bound on the shutdown flush.
    pub shutdown_grace: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            batch_interval: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Owns the delivery queue and its dispatcher task.
///
/// Every method takes `&self` so the engine can sit behind an `Arc` shared by
/// cloned client handles.
#[derive(Debug)]
pub struct DeliveryEngine {
    config: DeliveryConfig,
    queue: Arc<DeliveryQueue>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    last_error: Arc<LastErrorSlot>,
    counters: Arc<DeliveryCounters>,
    cancellation_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryEngine {
    /// Creates an engine. No task runs until [`Self::start`].
    pub fn new(
        config: DeliveryConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue = Arc::new(DeliveryQueue::new(config.queue_capacity, config.batch_size));
        let last_error = Arc::new(LastErrorSlot::new());
        let counters = Arc::new(DeliveryCounters::default());
        let cancellation_token = CancellationToken::new();

        let dispatcher = Dispatcher::new(
            queue.clone(),
            transport,
            clock.clone(),
            config.retry_policy.clone(),
            config.batch_interval,
            last_error.clone(),
            counters.clone(),
            cancellation_token.clone(),
        );

        Self {
            config,
            queue,
            dispatcher,
            clock,
            last_error,
            counters,
            cancellation_token,
            handle: Mutex::new(None),
        }
    }

    /// Spawns the dispatcher on the current tokio runtime.
    ///
    /// Calling it again while the dispatcher runs is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` when called outside a
    /// tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DeliveryError::configuration(format!("delivery engine requires a tokio runtime: {e}"))
        })?;

        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }

        info!(
            queue_capacity = self.config.queue_capacity,
            batch_size = self.config.batch_size,
            "starting delivery engine"
        );

        let dispatcher = self.dispatcher.clone();
        *handle = Some(runtime.spawn(async move { dispatcher.run().await }));
        Ok(())
    }

    /// Queues an event for delivery without blocking.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::QueueFull` when the queue is at capacity.
    pub fn enqueue(&self, event: Event) -> Result<()> {
        let event_id = event.id();
        match self.queue.enqueue(event, self.clock.now()) {
            Ok(()) => {
                self.counters.record_enqueued();
                Ok(())
            },
            Err(error) => {
                warn!(event_id = %event_id, error = %error, "dropping event");
                Err(error)
            },
        }
    }

    /// Sends everything currently due, bounded by `timeout`.
    ///
    /// Returns the number of events handed to the transport.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Timeout` if the flush did not finish in time.
    pub async fn flush(&self, timeout: Duration) -> Result<usize> {
        tokio::time::timeout(timeout, self.dispatcher.dispatch_once())
            .await
            .map_err(|_| DeliveryError::timeout(timeout))
    }

    /// Stops the dispatcher and makes one final attempt at everything queued.
    ///
    /// The whole shutdown, including waiting for an in-flight send, is
    /// bounded by `grace`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        let started = std::time::Instant::now();
        info!(
            grace_ms = grace.as_millis(),
            queued = self.queue.len(),
            "shutting down delivery engine"
        );

        self.cancellation_token.cancel();

        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => {},
                Ok(Err(join_error)) => {
                    error!(error = %join_error, "dispatcher task failed during shutdown");
                },
                Err(_) => {
                    handle.abort();
                    warn!(grace_ms = grace.as_millis(), "dispatcher did not stop in time, aborted");
                    return Err(DeliveryError::ShutdownTimeout { timeout: grace });
                },
            }
        }

        let remaining = grace.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, self.dispatcher.final_flush()).await {
            Ok(sent) => {
                info!(sent, "delivery engine shut down");
                Ok(())
            },
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis(),
                    abandoned = self.queue.len(),
                    "final flush exceeded shutdown grace"
                );
                Err(DeliveryError::ShutdownTimeout { timeout: grace })
            },
        }
    }

    /// The most recent send failure, cleared by the next success.
    pub fn last_error(&self) -> Option<LastError> {
        self.last_error.get()
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> DeliveryStats {
        self.counters.snapshot(self.queue.dropped_count())
    }

    /// Number of events waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Engine configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }
}

impl Drop for DeliveryEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            if !handle.is_finished() && !self.cancellation_token.is_cancelled() {
                self.cancellation_token.cancel();
                warn!(
                    queued = self.queue.len(),
                    "delivery engine dropped without shutdown, queued events are lost"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use faultline_core::{Extra, Level, RealClock, Tags};

    use super::*;
    use crate::transport::mock::MockTransport;

    fn event(text: &str) -> Event {
        Event::from_message(text, Level::Warning, Tags::new(), Extra::new(), Utc::now()).unwrap()
    }

    fn engine(transport: Arc<MockTransport>) -> DeliveryEngine {
        DeliveryEngine::new(DeliveryConfig::default(), transport, Arc::new(RealClock::new()))
    }

    #[test]
    fn start_outside_runtime_fails() {
        let engine = engine(Arc::new(MockTransport::new()));
        assert!(matches!(engine.start(), Err(DeliveryError::ConfigurationError { .. })));
    }

    #[tokio::test]
    async fn flush_sends_queued_events() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine(transport.clone());

        engine.enqueue(event("one")).unwrap();
        engine.enqueue(event("two")).unwrap();
        assert_eq!(engine.flush(Duration::from_secs(1)).await.unwrap(), 2);

        assert_eq!(transport.events().len(), 2);
        let stats = engine.stats();
        assert_eq!((stats.enqueued, stats.delivered, stats.batches_sent), (2, 2, 1));
    }

    #[tokio::test]
    async fn shutdown_flushes_remaining_events() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine(transport.clone());
        engine.start().unwrap();

        engine.enqueue(event("pending at shutdown")).unwrap();
        engine.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(transport.events()[0].title, "pending at shutdown");
        assert_eq!(engine.queue_len(), 0);
    }

    #[tokio::test]
    async fn shutdown_bounded_by_grace_when_transport_hangs() {
        let transport = Arc::new(MockTransport::hanging());
        let engine = engine(transport.clone());
        engine.start().unwrap();
        engine.enqueue(event("stuck")).unwrap();

        let started = std::time::Instant::now();
        let result = engine.shutdown(Duration::from_millis(100)).await;

        assert!(matches!(result, Err(DeliveryError::ShutdownTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
