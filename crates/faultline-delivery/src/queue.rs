//! Bounded in-memory queue of events awaiting delivery.
//!
//! The capture path only ever calls [`DeliveryQueue::enqueue`], which takes
//! one short lock and never waits on I/O. The dispatcher is the only
//! consumer.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use faultline_core::Event;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{DeliveryError, Result};

/// Lifecycle of a queued event.
///
/// `Queued → InFlight → {Delivered, Retrying → Queued, Dropped}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Waiting in the queue for its next attempt.
    Queued,
    /// Taken by the dispatcher and part of a batch being sent.
    InFlight,
    /// Failed transiently and waiting to be requeued.
    Retrying,
    /// Accepted by the collector.
    Delivered,
    /// Discarded without delivery.
    Dropped,
}

/// An event plus its delivery bookkeeping.
#[derive(Debug, Clone)]
pub struct DeliveryItem {
    /// The captured event.
    pub event: Event,
    /// Send attempts made so far.
    pub attempts: u32,
    /// When the event entered the queue.
    pub queued_at: Instant,
    /// Earliest time the next attempt may be made.
    pub next_attempt_at: Instant,
    /// Current lifecycle state.
    pub state: DeliveryState,
}

impl DeliveryItem {
    /// Wraps a freshly captured event, eligible immediately.
    pub fn new(event: Event, now: Instant) -> Self {
        Self {
            event,
            attempts: 0,
            queued_at: now,
            next_attempt_at: now,
            state: DeliveryState::Queued,
        }
    }

    /// Returns `true` if the item may be attempted at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt_at <= now
    }
}

/// Queue contents behind the lock.
#[derive(Debug, Default)]
struct Slots {
    items: VecDeque<DeliveryItem>,
    /// Items never attempted. New captures are due on arrival, so this
    /// stands in for the ready count on the capture path.
    fresh: usize,
}

impl Slots {
    fn push_back(&mut self, item: DeliveryItem) {
        if item.attempts == 0 {
            self.fresh += 1;
        }
        self.items.push_back(item);
    }

    fn push_front(&mut self, item: DeliveryItem) {
        if item.attempts == 0 {
            self.fresh += 1;
        }
        self.items.push_front(item);
    }

    fn taken(&mut self, item: &DeliveryItem) {
        if item.attempts == 0 {
            self.fresh = self.fresh.saturating_sub(1);
        }
    }
}

/// FIFO queue with a hard capacity.
#[derive(Debug)]
pub struct DeliveryQueue {
    capacity: usize,
    batch_size: usize,
    slots: Mutex<Slots>,
    ready: Notify,
    dropped: AtomicU64,
}

impl DeliveryQueue {
    /// Creates an empty queue.
    ///
    /// `batch_size` is the number of ready items that wakes the dispatcher
    /// ahead of its interval.
    pub fn new(capacity: usize, batch_size: usize) -> Self {
        Self {
            capacity,
            batch_size: batch_size.max(1),
            slots: Mutex::new(Slots {
                items: VecDeque::with_capacity(capacity.min(1024)),
                fresh: 0,
            }),
            ready: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends an event.
    ///
    /// Wakes the dispatcher once `batch_size` never-attempted events are
    /// waiting. Retries are left to the interval tick.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::QueueFull` when the queue is at capacity. The
    /// event is discarded and counted in [`Self::dropped_count`].
    pub fn enqueue(&self, event: Event, now: Instant) -> Result<()> {
        let fresh = {
            let mut slots = self.slots.lock();
            if slots.items.len() >= self.capacity {
                drop(slots);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(DeliveryError::QueueFull { capacity: self.capacity });
            }
            slots.push_back(DeliveryItem::new(event, now));
            slots.fresh
        };

        if fresh >= self.batch_size {
            self.ready.notify_one();
        }
        Ok(())
    }

    /// Puts a transiently failed item back for a later attempt.
    ///
    /// Returns `false` and counts the item as dropped if the queue filled up
    /// while it was in flight.
    pub fn requeue(&self, mut item: DeliveryItem) -> bool {
        let mut slots = self.slots.lock();
        if slots.items.len() >= self.capacity {
            drop(slots);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        item.state = DeliveryState::Queued;
        slots.push_back(item);
        true
    }

    /// Returns items whose send was abandoned to the front of the queue,
    /// keeping their order.
    ///
    /// Items that no longer fit are counted as dropped. Returns the number
    /// put back.
    pub fn restore(&self, items: Vec<DeliveryItem>) -> usize {
        let mut slots = self.slots.lock();
        let room = self.capacity.saturating_sub(slots.items.len());
        let overflow = items.len().saturating_sub(room);
        let restored = items.len() - overflow;

        for mut item in items.into_iter().take(restored).rev() {
            item.state = DeliveryState::Queued;
            slots.push_front(item);
        }
        drop(slots);

        if overflow > 0 {
            let overflow = u64::try_from(overflow).unwrap_or(u64::MAX);
            self.dropped.fetch_add(overflow, Ordering::Relaxed);
        }
        restored
    }

    /// Removes up to `max` due items in FIFO order and marks them in flight.
    pub fn take_ready(&self, now: Instant, max: usize) -> Vec<DeliveryItem> {
        let mut slots = self.slots.lock();
        let mut taken = Vec::new();
        let mut remaining = VecDeque::with_capacity(slots.items.len());

        for mut item in std::mem::take(&mut slots.items) {
            if taken.len() < max && item.is_due(now) {
                slots.taken(&item);
                item.state = DeliveryState::InFlight;
                taken.push(item);
            } else {
                remaining.push_back(item);
            }
        }

        slots.items = remaining;
        taken
    }

    /// Removes up to `max` items regardless of their retry schedule.
    pub fn drain_all(&self, max: usize) -> Vec<DeliveryItem> {
        let mut slots = self.slots.lock();
        let count = max.min(slots.items.len());
        let mut taken = slots.items.drain(..count).collect::<Vec<_>>();
        for item in &mut taken {
            slots.taken(item);
            item.state = DeliveryState::InFlight;
        }
        taken
    }

    /// Number of items due at `now`.
    pub fn ready_count(&self, now: Instant) -> usize {
        self.slots.lock().items.iter().filter(|item| item.is_due(now)).count()
    }

    /// Completes once a full batch is ready.
    pub async fn batch_ready(&self) {
        self.ready.notified().await;
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.slots.lock().items.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().items.is_empty()
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ready count that triggers an early send.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Events discarded because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
