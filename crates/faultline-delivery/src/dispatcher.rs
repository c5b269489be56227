//! Background task that drains the delivery queue.
//!
//! One dispatcher runs per engine. Each cycle sends full batches back to back
//! and then one partial batch. Cycles never overlap: the run loop and
//! explicit flushes share a cycle lock.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use faultline_core::{Clock, WireBatch};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    queue::{DeliveryItem, DeliveryQueue, DeliveryState},
    retry::{RetryContext, RetryDecision, RetryPolicy},
    transport::{DeliveryResult, LastErrorSlot, Transport},
};

/// Point-in-time delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Events accepted into the queue.
    pub enqueued: u64,
    /// Events discarded because the queue was full.
    pub dropped_queue_full: u64,
    /// Events accepted by the collector.
    pub delivered: u64,
    /// Retries scheduled after transient failures.
    pub retried: u64,
    /// Events dropped after exhausting their attempts.
    pub dropped_exhausted: u64,
    /// Events dropped because the shutdown attempt failed transiently.
    pub dropped_shutdown: u64,
    /// Events dropped because the collector rejected them.
    pub rejected: u64,
    /// Batches handed to the transport.
    pub batches_sent: u64,
}

/// Live counters shared between the engine and its dispatcher.
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    dropped_exhausted: AtomicU64,
    dropped_shutdown: AtomicU64,
    rejected: AtomicU64,
    batches_sent: AtomicU64,
}

impl DeliveryCounters {
    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of all counters.
    pub fn snapshot(&self, dropped_queue_full: u64) -> DeliveryStats {
        DeliveryStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_queue_full,
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped_exhausted: self.dropped_exhausted.load(Ordering::Relaxed),
            dropped_shutdown: self.dropped_shutdown.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
        }
    }
}

fn count(items: &[DeliveryItem]) -> u64 {
    u64::try_from(items.len()).unwrap_or(u64::MAX)
}

/// Items handed to the transport but not yet settled.
///
/// If the send is cancelled, dropping the guard puts the items back at the
/// front of the queue so a timed-out flush or an aborted task loses nothing.
struct InFlight<'a> {
    queue: &'a DeliveryQueue,
    items: Vec<DeliveryItem>,
}

impl<'a> InFlight<'a> {
    fn new(queue: &'a DeliveryQueue, items: Vec<DeliveryItem>) -> Self {
        Self { queue, items }
    }

    /// Takes the items back once the transport has answered.
    fn settle(mut self) -> Vec<DeliveryItem> {
        std::mem::take(&mut self.items)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.items.is_empty() {
            return;
        }

        let abandoned = self.items.len();
        let restored = self.queue.restore(std::mem::take(&mut self.items));
        warn!(abandoned, restored, "send cancelled, batch returned to queue");
    }
}

/// Sends queued events and applies retry decisions.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    queue: Arc<DeliveryQueue>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    batch_interval: Duration,
    last_error: Arc<LastErrorSlot>,
    counters: Arc<DeliveryCounters>,
    cycle: Arc<Mutex<()>>,
    cancellation_token: CancellationToken,
}

impl Dispatcher {
    /// Creates a dispatcher over shared engine state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<DeliveryQueue>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        batch_interval: Duration,
        last_error: Arc<LastErrorSlot>,
        counters: Arc<DeliveryCounters>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            queue,
            transport,
            clock,
            policy,
            batch_interval,
            last_error,
            counters,
            cycle: Arc::new(Mutex::new(())),
            cancellation_token,
        }
    }

    /// Main loop: waits for a full batch, the interval or cancellation.
    pub async fn run(&self) {
        info!(
            batch_size = self.queue.batch_size(),
            interval_ms = self.batch_interval.as_millis(),
            "dispatcher starting"
        );

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            tokio::select! {
                () = self.queue.batch_ready() => {},
                () = self.clock.sleep(self.batch_interval) => {},
                () = self.cancellation_token.cancelled() => break,
            }

            self.dispatch_once().await;
        }

        info!("dispatcher stopped");
    }

    /// Sends every item that is due, in batches.
    ///
    /// Returns the number of items handed to the transport.
    pub async fn dispatch_once(&self) -> usize {
        let _cycle = self.cycle.lock().await;
        let batch_size = self.queue.batch_size();
        let mut sent = 0;

        loop {
            let items = self.queue.take_ready(self.clock.now(), batch_size);
            if items.is_empty() {
                break;
            }

            let partial = items.len() < batch_size;
            sent += items.len();
            self.send_batch(items, false).await;

            if partial {
                break;
            }
        }

        sent
    }

    /// Sends everything left in the queue once, ignoring retry schedules.
    ///
    /// Items that fail are dropped rather than requeued.
    pub async fn final_flush(&self) -> usize {
        let _cycle = self.cycle.lock().await;
        let mut sent = 0;

        loop {
            let items = self.queue.drain_all(self.queue.batch_size());
            if items.is_empty() {
                break;
            }
            sent += items.len();
            self.send_batch(items, true).await;
        }

        sent
    }

    async fn send_batch(&self, mut items: Vec<DeliveryItem>, final_attempt: bool) {
        for item in &mut items {
            item.attempts += 1;
        }

        let batch = WireBatch::new(items.iter().map(|item| &item.event), self.clock.now_utc());
        debug!(batch_size = batch.len(), "sending batch");

        let in_flight = InFlight::new(&self.queue, items);
        self.counters.batches_sent.fetch_add(1, Ordering::Relaxed);
        let result = self.transport.send(&batch).await;
        let items = in_flight.settle();

        match result {
            DeliveryResult::Delivered { status } => {
                self.last_error.clear();
                self.counters.delivered.fetch_add(count(&items), Ordering::Relaxed);
                debug!(batch_size = items.len(), status, "batch delivered");
            },
            DeliveryResult::Retryable(error) if !final_attempt => {
                self.last_error.record(&error);
                let failed_at = self.clock.now();

                for mut item in items {
                    let context = RetryContext::new(
                        item.attempts,
                        error.clone(),
                        failed_at,
                        self.policy.clone(),
                    );

                    match context.decide_retry() {
                        RetryDecision::Retry { next_attempt_at, delay } => {
                            item.state = DeliveryState::Retrying;
                            item.next_attempt_at = next_attempt_at;
                            self.counters.retried.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                event_id = %item.event.id(),
                                attempt = item.attempts,
                                delay_ms = delay.as_millis(),
                                error = %error,
                                "delivery failed, retry scheduled"
                            );
                            let event_id = item.event.id();
                            if !self.queue.requeue(item) {
                                warn!(event_id = %event_id, "queue full, retry dropped");
                            }
                        },
                        RetryDecision::GiveUp { reason } => {
                            item.state = DeliveryState::Dropped;
                            self.counters.dropped_exhausted.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                event_id = %item.event.id(),
                                fingerprint = item.event.fingerprint(),
                                attempt = item.attempts,
                                reason = %reason,
                                "delivery permanently failed"
                            );
                        },
                    }
                }
            },
            DeliveryResult::Retryable(error) => {
                self.last_error.record(&error);
                self.counters.dropped_shutdown.fetch_add(count(&items), Ordering::Relaxed);
                warn!(
                    batch_size = items.len(),
                    error = %error,
                    "final delivery failed, dropping batch"
                );
            },
            DeliveryResult::Rejected(error) => {
                self.last_error.record(&error);
                self.counters.rejected.fetch_add(count(&items), Ordering::Relaxed);
                error!(
                    batch_size = items.len(),
                    status = error.status_code(),
                    error = %error,
                    "batch rejected, dropping events"
                );
            },
        }
    }
}
