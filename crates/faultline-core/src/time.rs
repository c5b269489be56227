//! Clock abstraction for capture timestamps, dedup windows and retry timing.
//!
//! Everything time-dependent in the pipeline reads time through [`Clock`] so
//! tests can drive dedup windows and backoff schedules without sleeping.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant, used for dedup windows and retry scheduling.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for event timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Wall-clock time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }
}

/// Production clock backed by the system and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Real-time interval at which a sleeping [`TestClock`] rechecks its time.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same underlying time, so a clock handed to a client can
/// still be advanced from the test body. Time only moves through
/// [`TestClock::advance`], so background loops sleeping on it stay parked.
#[derive(Debug, Clone)]
pub struct TestClock {
    monotonic_ns: Arc<AtomicU64>,
    system_ns: Arc<AtomicU64>,
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock starting at the current wall-clock time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock starting at a specific wall-clock time.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();

        Self {
            monotonic_ns: Arc::new(AtomicU64::new(0)),
            system_ns: Arc::new(AtomicU64::new(saturating_nanos(since_epoch))),
            base_instant: Instant::now(),
        }
    }

    /// Advances both clocks by the specified duration.
    pub fn advance(&self, duration: Duration) {
        let duration_ns = saturating_nanos(duration);
        self.monotonic_ns.fetch_add(duration_ns, Ordering::AcqRel);
        self.system_ns.fetch_add(duration_ns, Ordering::AcqRel);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + Duration::from_nanos(self.monotonic_ns.load(Ordering::Acquire))
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.system_ns.load(Ordering::Acquire))
    }

    /// Completes once the clock has been advanced past the deadline.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let deadline = self.now() + duration;
        Box::pin(async move {
            while self.now() < deadline {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_both_clocks() {
        let start = UNIX_EPOCH + Duration::from_secs(1_000);
        let clock = TestClock::with_start_time(start);
        let instant = clock.now();

        clock.advance(Duration::from_secs(30));

        assert_eq!(clock.now().duration_since(instant), Duration::from_secs(30));
        assert_eq!(clock.now_system(), start + Duration::from_secs(30));
    }

    #[test]
    fn clones_share_time() {
        let clock = TestClock::new();
        let shared = clock.clone();
        let before = shared.now();

        clock.advance(Duration::from_millis(250));

        assert_eq!(shared.now().duration_since(before), Duration::from_millis(250));
    }

    #[test]
    fn utc_timestamp_follows_system_time() {
        let clock = TestClock::with_start_time(UNIX_EPOCH + Duration::from_secs(86_400));
        assert_eq!(clock.now_utc().to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }

    #[tokio::test]
    async fn sleep_waits_for_virtual_time() {
        let clock = TestClock::new();
        let sleeper = clock.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "sleep must not complete before time advances");

        clock.advance(Duration::from_secs(5));
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
