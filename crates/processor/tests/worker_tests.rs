//! Worker integration tests
//!
//! Test Coverage:
//! - Sink retries with backoff
//! - Backpressure from a slow sink
//! - Bounded stop with a stalled sink
//! - Decode error forwarding
//! - Metrics export

mod common;

use common::{distinct_alerts, latest_metrics, reference_run, test_config, traffic, wait_for_condition};
use processor::error::{ProcessorError, SinkError};
use processor::metrics::MetricsRegistry;
use processor::pipeline::{Worker, WorkerState};
use processor::sink::CollectingSink;
use processor::source::MemorySource;
use processor::state::{BackendCheckpointStore, MemoryStateBackend};
use std::sync::Arc;
use std::time::Duration;

fn bounded_source(events: &[analytics_types::AnalyticsEvent]) -> MemorySource {
    let source = MemorySource::new(3);
    for event in events {
        source.push_event(event).unwrap();
    }
    source.close();
    source
}

fn memory_store() -> Arc<BackendCheckpointStore<MemoryStateBackend>> {
    Arc::new(BackendCheckpointStore::new(MemoryStateBackend::new()))
}

#[tokio::test]
async fn test_failed_sink_writes_are_retried() {
    let mut config = test_config();
    config.sink.max_retries = 2;
    // One partition keeps arrival order equal to the reference run
    let source = MemorySource::new(1);
    let events = traffic(200);
    for event in &events {
        source.push_event(event).unwrap();
    }
    source.close();

    let sink = CollectingSink::new();
    sink.fail_next_writes(5);

    let worker = Worker::new(
        config.clone(),
        source.clone(),
        Arc::new(sink.clone()),
        Arc::new(sink.clone()),
        memory_store(),
    )
    .unwrap();
    let metrics = worker.metrics().clone();

    tokio::time::timeout(Duration::from_secs(5), worker.spawn().join())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(metrics.sink_retries.get(), 5);
    let expected = reference_run(&config, &events);
    assert_eq!(sink.latest_metrics(), latest_metrics(&expected));
    assert_eq!(sink.distinct_alerts(), distinct_alerts(&expected));
    assert_eq!(source.committed()[&0], events.len() as i64);
}

#[tokio::test]
async fn test_slow_sink_applies_backpressure() {
    let mut config = test_config();
    config.sink.queue_capacity = 1;
    let events = traffic(400);
    let source = bounded_source(&events);

    let sink = CollectingSink::new();
    sink.set_paused(true);

    let worker = Worker::new(
        config,
        source,
        Arc::new(sink.clone()),
        Arc::new(sink.clone()),
        memory_store(),
    )
    .unwrap();
    let metrics = worker.metrics().clone();
    let handle = worker.spawn();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let processed = metrics.events_processed.get();
    assert!(processed > 0);
    assert!(processed < events.len() as u64, "intake did not stall: {}", processed);
    assert!(sink.metrics().is_empty());
    assert!(!handle.is_finished());

    sink.set_paused(false);
    tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(metrics.events_processed.get(), events.len() as u64);
    assert!(!sink.metrics().is_empty());
}

#[tokio::test]
async fn test_stop_is_bounded_when_sink_stalls() {
    let mut config = test_config();
    config.sink.queue_capacity = 1;
    config.shutdown_timeout_ms = 200;
    let events = traffic(400);
    // Left open so only shutdown ends the run
    let source = MemorySource::new(3);
    for event in &events {
        source.push_event(event).unwrap();
    }

    let sink = CollectingSink::new();
    sink.set_paused(true);

    let worker = Worker::new(
        config,
        source.clone(),
        Arc::new(sink.clone()),
        Arc::new(sink.clone()),
        memory_store(),
    )
    .unwrap();
    let metrics = worker.metrics().clone();
    let handle = worker.spawn();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(metrics.events_processed.get() < events.len() as u64);

    let started = std::time::Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(3), handle.stop())
        .await
        .expect("stop did not return while the sink was stalled");
    assert!(started.elapsed() < Duration::from_secs(3));

    match result {
        Err(ProcessorError::Sink(SinkError::DrainTimeout { undelivered, .. })) => {
            assert!(undelivered > 0)
        }
        other => panic!("unexpected stop result: {:?}", other),
    }
    assert!(sink.metrics().is_empty());
    assert!(source.committed().values().sum::<i64>() < events.len() as i64);
}

#[tokio::test]
async fn test_decode_errors_are_forwarded_and_skipped() {
    let source = MemorySource::new(1);
    source.push(0, b"not json".to_vec()).unwrap();
    for event in &traffic(30) {
        source.push_event(event).unwrap();
    }
    source.push(0, br#"{"eventType": "PAGE_VIEW", "userId": "u1"}"#.to_vec()).unwrap();
    source.close();

    let sink = CollectingSink::new();
    let mut worker = Worker::new(
        test_config(),
        source.clone(),
        Arc::new(sink.clone()),
        Arc::new(sink),
        memory_store(),
    )
    .unwrap();
    let mut errors = worker.decode_error_channel();
    let metrics = worker.metrics().clone();

    tokio::time::timeout(Duration::from_secs(5), worker.spawn().join())
        .await
        .unwrap()
        .unwrap();

    let first = errors.recv().await.unwrap();
    assert_eq!(first.offset, 0);
    assert!(first.reason.contains("invalid JSON"));

    let second = errors.recv().await.unwrap();
    assert_eq!(second.offset, 31);
    assert!(second.reason.contains("timestamp"));

    assert_eq!(metrics.decode_errors.get(), 2);
    assert_eq!(metrics.events_processed.get(), 30);
    assert_eq!(source.committed()[&0], 32);
}

#[tokio::test]
async fn test_status_reports_progress() {
    let source = MemorySource::new(2);
    let sink = CollectingSink::new();
    let worker = Worker::new(
        test_config(),
        source.clone(),
        Arc::new(sink.clone()),
        Arc::new(sink),
        memory_store(),
    )
    .unwrap();
    let handle = worker.spawn();

    for event in &traffic(50) {
        source.push_event(event).unwrap();
    }

    let progressed = wait_for_condition(
        || {
            let status = handle.status();
            status.stats.events_processed == 50 && status.last_checkpoint_id.is_some()
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(progressed);

    let status = handle.status();
    assert_eq!(status.state, WorkerState::Running);
    assert!(status.watermark > common::T0);
    assert!(status.active_windows > 0);
    assert!(status.started_at.is_some());

    tokio::time::timeout(Duration::from_secs(5), handle.stop())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_engine_metrics_are_exported() {
    let registry = MetricsRegistry::new();
    let sink = CollectingSink::new();
    let worker = Worker::new(
        test_config(),
        bounded_source(&traffic(120)),
        Arc::new(sink.clone()),
        Arc::new(sink),
        memory_store(),
    )
    .unwrap();
    worker.metrics().register(&registry);

    tokio::time::timeout(Duration::from_secs(5), worker.spawn().join())
        .await
        .unwrap()
        .unwrap();

    let exported = registry.encode().unwrap();
    assert!(exported.contains("analytics_events_processed_total 120"));
    assert!(exported.contains("analytics_windows_fired_total{metric=\"PAGE_VIEWS_PER_SECOND\"}"));
    assert!(exported.contains("analytics_checkpoints_completed_total"));
}
