use analytics_types::{AlertRecord, MetricRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{AlertSink, MetricSink};
use crate::error::{SinkError, SinkResult};

/// In-memory sink that records every write
///
/// Clones share the recorded data. Failure injection and pausing make it
/// usable for retry and backpressure tests.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    metrics: Arc<Mutex<Vec<MetricRecord>>>,
    alerts: Arc<Mutex<Vec<AlertRecord>>>,
    failures: Arc<AtomicU32>,
    paused: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every metric write, in delivery order
    pub fn metrics(&self) -> Vec<MetricRecord> {
        self.metrics.lock().clone()
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().clone()
    }

    /// Metric records as an idempotent store would hold them: one per id,
    /// highest revision wins
    pub fn latest_metrics(&self) -> BTreeMap<String, MetricRecord> {
        let mut latest: BTreeMap<String, MetricRecord> = BTreeMap::new();
        for record in self.metrics.lock().iter() {
            match latest.get(&record.metric_id) {
                Some(existing) if !record.supersedes(existing) => {}
                _ => {
                    latest.insert(record.metric_id.clone(), record.clone());
                }
            }
        }
        latest
    }

    /// Alerts deduplicated by id
    pub fn distinct_alerts(&self) -> BTreeMap<String, AlertRecord> {
        self.alerts
            .lock()
            .iter()
            .map(|alert| (alert.alert_id.clone(), alert.clone()))
            .collect()
    }

    /// Make the next `n` writes fail
    pub fn fail_next_writes(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Block writes until unpaused
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.metrics.lock().clear();
        self.alerts.lock().clear();
    }

    async fn admit(&self) -> SinkResult<()> {
        while self.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed {
                sink: "collecting".to_string(),
            });
        }

        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SinkError::WriteFailed {
                sink: "collecting".to_string(),
                reason: "injected failure".to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl MetricSink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn write_metric(&self, record: &MetricRecord) -> SinkResult<()> {
        self.admit().await?;
        self.metrics.lock().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertSink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn write_alert(&self, alert: &AlertRecord) -> SinkResult<()> {
        self.admit().await?;
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}
