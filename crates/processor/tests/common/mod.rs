//! Common test utilities for integration tests

#![allow(dead_code)]

use analytics_types::{
    AlertRecord, AnalyticsEvent, ConversionData, EventPayload, EventType, MetricRecord,
};
use processor::config::EngineConfig;
use processor::pipeline::AnalyticsEngine;
use processor::sink::EngineOutput;
use std::collections::BTreeMap;
use std::time::Duration;

/// Aligned to both 5 s windows and 5 min pattern intervals
pub const T0: i64 = 1_699_999_800_000;

/// Engine config with fast ticks and no wall-clock idleness
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.watermark.max_out_of_orderness_ms = 2_000;
    config.watermark.idle_timeout_ms = None;
    config.watermark.update_interval_ms = 20;
    config.checkpoint.interval_ms = 50;
    config.sink.base_backoff_ms = 1;
    config.sink.max_backoff_ms = 5;
    config
}

/// Deterministic website traffic
///
/// Events are roughly 150 ms apart and arrive at most 1.5 s out of order,
/// inside the 2 s bound of [`test_config`].
pub fn traffic(n: usize) -> Vec<AnalyticsEvent> {
    let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed
    };

    (0..n)
        .map(|i| {
            let r = next();
            let jitter = (r % 1_500) as i64;
            let t = T0 + i as i64 * 150 + 1_500 - jitter;
            let user = format!("user-{}", (r >> 16) % 7);
            let session = format!("{}-s{}", user, (i / 40) % 3);
            let id = format!("evt-{:05}", i);

            let event = match (r >> 24) % 10 {
                0 => AnalyticsEvent::new(id, t, user, EventType::SessionStart),
                1 => AnalyticsEvent::new(id, t, user, EventType::SessionEnd),
                2 => AnalyticsEvent::new(id, t, user, EventType::Conversion).with_payload(
                    EventPayload::Conversion(ConversionData {
                        value: Some(((r >> 32) % 200) as f64),
                        ..Default::default()
                    }),
                ),
                _ => AnalyticsEvent::new(id, t, user, EventType::PageView),
            };
            event.with_session(session)
        })
        .collect()
}

/// Outputs of an uninterrupted run over `events`, closed with `finish`
pub fn reference_run(config: &EngineConfig, events: &[AnalyticsEvent]) -> Vec<EngineOutput> {
    let mut engine = AnalyticsEngine::new(config).expect("valid config");
    let mut outputs = Vec::new();
    for event in events {
        outputs.extend(engine.process_event(0, event));
    }
    outputs.extend(engine.finish());
    outputs
}

/// Metric records as an idempotent store keeps them
pub fn latest_metrics<'a>(
    outputs: impl IntoIterator<Item = &'a EngineOutput>,
) -> BTreeMap<String, MetricRecord> {
    let mut latest: BTreeMap<String, MetricRecord> = BTreeMap::new();
    for record in outputs.into_iter().filter_map(EngineOutput::as_metric) {
        match latest.get(&record.metric_id) {
            Some(existing) if !record.supersedes(existing) => {}
            _ => {
                latest.insert(record.metric_id.clone(), record.clone());
            }
        }
    }
    latest
}

pub fn distinct_alerts<'a>(
    outputs: impl IntoIterator<Item = &'a EngineOutput>,
) -> BTreeMap<String, AlertRecord> {
    outputs
        .into_iter()
        .filter_map(EngineOutput::as_alert)
        .map(|alert| (alert.alert_id.clone(), alert.clone()))
        .collect()
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for_condition<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
