//! Bounded duplicate-suppression index.
//!
//! Tracks when each fingerprint was last let through so a noisy fault is
//! reported once per window instead of once per occurrence. The index is an
//! LRU map: when it is full the least-recently-seen fingerprint is evicted,
//! after which a duplicate may slip through. Suppression is best-effort.

use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// Default number of fingerprints tracked.
pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug)]
struct Entry {
    admitted_at: Instant,
    recency: u64,
}

#[derive(Debug, Default)]
struct LruState {
    entries: HashMap<String, Entry>,
    // recency tick -> fingerprint, oldest first
    order: BTreeMap<u64, String>,
    tick: u64,
}

impl LruState {
    fn touch(&mut self, fingerprint: &str) -> u64 {
        self.tick += 1;
        if let Some(entry) = self.entries.get_mut(fingerprint) {
            self.order.remove(&entry.recency);
            entry.recency = self.tick;
        }
        self.order.insert(self.tick, fingerprint.to_string());
        self.tick
    }

    fn evict_oldest(&mut self) {
        if let Some((_, fingerprint)) = self.order.pop_first() {
            self.entries.remove(&fingerprint);
        }
    }
}

/// Concurrency-safe LRU index of recently admitted fingerprints.
#[derive(Debug)]
pub struct DedupIndex {
    capacity: usize,
    state: Mutex<LruState>,
}

impl DedupIndex {
    /// Creates an index tracking at most `capacity` fingerprints.
    ///
    /// A capacity of zero disables suppression.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, state: Mutex::new(LruState::default()) }
    }

    /// Returns `true` if `fingerprint` was admitted within `window` of `now`.
    ///
    /// An admitted fingerprint has its timestamp reset to `now`. A suppressed
    /// one only refreshes its LRU position, so its window keeps running from
    /// the last admission.
    pub fn should_suppress(&self, fingerprint: &str, now: Instant, window: Duration) -> bool {
        if self.capacity == 0 || window.is_zero() {
            return false;
        }

        let mut state = self.state.lock();

        let suppressed = state
            .entries
            .get(fingerprint)
            .is_some_and(|entry| now.saturating_duration_since(entry.admitted_at) < window);

        let recency = state.touch(fingerprint);
        if suppressed {
            return true;
        }

        state.entries.insert(fingerprint.to_string(), Entry { admitted_at: now, recency });
        while state.entries.len() > self.capacity {
            state.evict_oldest();
        }

        false
    }

    /// Number of fingerprints currently tracked.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if no fingerprints are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of fingerprints tracked.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
