//! Integration tests for the delivery engine.
//!
//! Covers retry scheduling, permanent failures, early batch sends, queue
//! overflow and capture isolation from a stuck collector.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use faultline_core::{Clock, Event, Extra, Level, RealClock, Tags, TestClock};
use faultline_delivery::{
    transport::mock::MockTransport, DeliveryConfig, DeliveryEngine, DeliveryError,
    DeliveryResult, RetryPolicy,
};
use tokio::time::timeout;

fn event(text: &str) -> Event {
    Event::from_message(text, Level::Error, Tags::new(), Extra::new(), Utc::now())
        .expect("valid message")
}

fn engine_with(
    transport: &Arc<MockTransport>,
    clock: Arc<dyn Clock>,
    config: DeliveryConfig,
) -> DeliveryEngine {
    DeliveryEngine::new(config, transport.clone(), clock)
}

async fn wait_for_calls(transport: &MockTransport, calls: usize) {
    timeout(Duration::from_secs(2), async {
        while transport.call_count() < calls {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("transport should have been called");
}

#[tokio::test]
async fn transient_failures_back_off_until_dropped() {
    let transport = Arc::new(MockTransport::always(DeliveryResult::Retryable(
        DeliveryError::server_error(503, "unavailable"),
    )));
    let clock = TestClock::new();
    let engine = engine_with(&transport, Arc::new(clock.clone()), DeliveryConfig::default());
    engine.enqueue(event("collector down")).unwrap();

    let step = Duration::from_millis(100);
    let start = clock.now();
    let mut send_times = Vec::new();

    for _ in 0..300 {
        let before = transport.call_count();
        engine.flush(Duration::from_secs(1)).await.unwrap();
        if transport.call_count() > before {
            send_times.push(clock.now() - start);
        }
        clock.advance(step);
    }

    assert_eq!(send_times.len(), 5, "one initial attempt plus four retries");
    let gaps = send_times.windows(2).map(|pair| pair[1] - pair[0]).collect::<Vec<_>>();
    assert!(gaps.windows(2).all(|pair| pair[1] > pair[0]), "delays must grow: {gaps:?}");

    let stats = engine.stats();
    assert_eq!(stats.retried, 4);
    assert_eq!(stats.dropped_exhausted, 1);
    assert_eq!(stats.delivered, 0);
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.last_error().and_then(|error| error.status), Some(503));
}

#[tokio::test]
async fn permanent_failure_drops_after_one_attempt() {
    let transport = Arc::new(MockTransport::always(DeliveryResult::Rejected(
        DeliveryError::client_error(401, "invalid key"),
    )));
    let clock = TestClock::new();
    let engine = engine_with(&transport, Arc::new(clock.clone()), DeliveryConfig::default());
    engine.enqueue(event("bad credentials")).unwrap();

    for _ in 0..10 {
        engine.flush(Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(30));
    }

    assert_eq!(transport.call_count(), 1);
    let stats = engine.stats();
    assert_eq!((stats.rejected, stats.retried), (1, 0));

    let last_error = engine.last_error().expect("rejection is recorded");
    assert_eq!(last_error.status, Some(401));
    assert_eq!(last_error.body, "invalid key");
}

#[tokio::test]
async fn full_batch_sent_without_waiting_for_interval() {
    let transport = Arc::new(MockTransport::new());
    let config = DeliveryConfig {
        batch_size: 2,
        batch_interval: Duration::from_secs(3600),
        ..Default::default()
    };
    let engine = engine_with(&transport, Arc::new(RealClock::new()), config);
    engine.start().unwrap();

    engine.enqueue(event("first")).unwrap();
    engine.enqueue(event("second")).unwrap();
    wait_for_calls(&transport, 1).await;

    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);

    engine.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn interval_sends_partial_batch() {
    let transport = Arc::new(MockTransport::new());
    let config = DeliveryConfig {
        batch_size: 10,
        batch_interval: Duration::from_millis(50),
        ..Default::default()
    };
    let engine = engine_with(&transport, Arc::new(RealClock::new()), config);
    engine.start().unwrap();

    engine.enqueue(event("lonely")).unwrap();
    wait_for_calls(&transport, 1).await;

    assert_eq!(transport.events()[0].title, "lonely");
    engine.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn queue_overflow_counts_drops() {
    let transport = Arc::new(MockTransport::new());
    let config = DeliveryConfig { queue_capacity: 3, ..Default::default() };
    let engine = engine_with(&transport, Arc::new(RealClock::new()), config);

    let results = (0..5)
        .map(|index| engine.enqueue(event(&format!("burst {index}"))))
        .collect::<Vec<_>>();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 3);
    assert!(matches!(results[4], Err(DeliveryError::QueueFull { capacity: 3 })));
    let stats = engine.stats();
    assert_eq!((stats.enqueued, stats.dropped_queue_full), (3, 2));
}

#[tokio::test]
async fn hung_transport_does_not_block_enqueue() {
    let transport = Arc::new(MockTransport::hanging());
    let config = DeliveryConfig { batch_size: 1, queue_capacity: 50, ..Default::default() };
    let engine = engine_with(&transport, Arc::new(RealClock::new()), config);
    engine.start().unwrap();

    engine.enqueue(event("first")).unwrap();
    wait_for_calls(&transport, 1).await;

    let started = Instant::now();
    for index in 0..20 {
        engine.enqueue(event(&format!("while stuck {index}"))).unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(100));

    let result = engine.shutdown(Duration::from_millis(50)).await;
    assert!(matches!(result, Err(DeliveryError::ShutdownTimeout { .. })));
}

#[tokio::test]
async fn rate_limit_waits_for_retry_after() {
    let transport = Arc::new(MockTransport::with_results([DeliveryResult::Retryable(
        DeliveryError::rate_limited(10, "slow down"),
    )]));
    let clock = TestClock::new();
    let config = DeliveryConfig {
        retry_policy: RetryPolicy { jitter_factor: 0.0, ..Default::default() },
        ..Default::default()
    };
    let engine = engine_with(&transport, Arc::new(clock.clone()), config);
    engine.enqueue(event("throttled")).unwrap();

    engine.flush(Duration::from_secs(1)).await.unwrap();
    clock.advance(Duration::from_secs(9));
    engine.flush(Duration::from_secs(1)).await.unwrap();
    assert_eq!(transport.call_count(), 1);

    clock.advance(Duration::from_secs(1));
    engine.flush(Duration::from_secs(1)).await.unwrap();
    assert_eq!(transport.call_count(), 2);
    assert_eq!(engine.stats().delivered, 1);
    assert_eq!(engine.last_error(), None);
}

#[tokio::test]
async fn timed_out_flush_keeps_events_for_shutdown() {
    let transport = Arc::new(MockTransport::hanging());
    let engine = engine_with(&transport, Arc::new(RealClock::new()), DeliveryConfig::default());
    engine.enqueue(event("slow collector")).unwrap();

    let result = engine.flush(Duration::from_millis(50)).await;
    assert!(matches!(result, Err(DeliveryError::Timeout { .. })));
    assert_eq!(engine.queue_len(), 1);
    let stats = engine.stats();
    assert_eq!((stats.delivered, stats.dropped_exhausted, stats.dropped_queue_full), (0, 0, 0));

    transport.release();
    engine.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(transport.call_count(), 2);
    assert_eq!(engine.stats().delivered, 1);
    assert_eq!(engine.queue_len(), 0);
}
