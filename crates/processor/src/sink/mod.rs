//! Metric and alert delivery
//!
//! The engine never writes to a sink directly. Every [`EngineOutput`] goes
//! through an [`OutputEmitter`]: a bounded queue drained by a background
//! writer task that retries failed writes with capped exponential backoff.
//!
//! Outputs are never dropped. A sink that keeps failing stalls the writer,
//! the queue fills up, and [`OutputEmitter::emit`] stops returning, which in
//! turn stops the worker from polling its source. Checkpoints wait on a
//! [`FlushBarrier`] so that input offsets are only committed once every output
//! derived from them has been delivered.

mod memory;

pub use memory::CollectingSink;

use analytics_types::{AlertRecord, MetricRecord};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SinkConfig;
use crate::error::{SinkError, SinkResult};
use crate::metrics::EngineMetrics;

/// Destination for fired window results
///
/// Writes must be idempotent by `metric_id`: the same record can be written
/// again after recovery.
#[async_trait]
pub trait MetricSink: Send + Sync {
    fn name(&self) -> &str;

    async fn write_metric(&self, record: &MetricRecord) -> SinkResult<()>;

    async fn flush(&self) -> SinkResult<()> {
        Ok(())
    }
}

/// Destination for pattern alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn write_alert(&self, alert: &AlertRecord) -> SinkResult<()>;

    async fn flush(&self) -> SinkResult<()> {
        Ok(())
    }
}

/// A record produced by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Metric(MetricRecord),
    Alert(AlertRecord),
}

impl EngineOutput {
    /// Deterministic idempotency key of the record
    pub fn id(&self) -> &str {
        match self {
            EngineOutput::Metric(record) => &record.metric_id,
            EngineOutput::Alert(alert) => &alert.alert_id,
        }
    }

    pub fn as_metric(&self) -> Option<&MetricRecord> {
        match self {
            EngineOutput::Metric(record) => Some(record),
            EngineOutput::Alert(_) => None,
        }
    }

    pub fn as_alert(&self) -> Option<&AlertRecord> {
        match self {
            EngineOutput::Alert(alert) => Some(alert),
            EngineOutput::Metric(_) => None,
        }
    }
}

/// Capped exponential backoff for sink writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which failures are logged as errors
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (zero based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(10);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SinkConfig::default())
    }
}

/// Completion point in the output stream
///
/// Resolves once every output emitted before the barrier was created has
/// been written.
#[derive(Debug)]
pub struct FlushBarrier {
    target: u64,
    written: watch::Receiver<u64>,
}

impl FlushBarrier {
    /// A barrier that is already reached
    pub fn ready() -> Self {
        let (_tx, written) = watch::channel(0);
        Self { target: 0, written }
    }

    pub fn is_reached(&self) -> bool {
        *self.written.borrow() >= self.target
    }

    pub async fn wait(mut self) -> SinkResult<()> {
        loop {
            if self.is_reached() {
                return Ok(());
            }
            if self.written.changed().await.is_err() {
                return if self.is_reached() {
                    Ok(())
                } else {
                    Err(SinkError::Closed {
                        sink: "output writer".to_string(),
                    })
                };
            }
        }
    }
}

/// Bounded, ordered queue in front of the metric and alert sinks
pub struct OutputEmitter {
    tx: mpsc::Sender<(u64, EngineOutput)>,
    next_seq: u64,
    written: watch::Receiver<u64>,
    writer: JoinHandle<()>,
}

impl OutputEmitter {
    pub fn new(
        metric_sink: Arc<dyn MetricSink>,
        alert_sink: Arc<dyn AlertSink>,
        config: &SinkConfig,
        metrics: EngineMetrics,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (written_tx, written) = watch::channel(0);

        let writer = OutputWriter {
            metric_sink,
            alert_sink,
            policy: RetryPolicy::from_config(config),
            metrics,
        };
        let writer = tokio::spawn(writer.run(rx, written_tx));

        Self {
            tx,
            next_seq: 0,
            written,
            writer,
        }
    }

    /// Queue one output, waiting while the queue is full
    pub async fn emit(&mut self, output: EngineOutput) -> SinkResult<()> {
        let seq = self.next_seq + 1;
        self.tx
            .send((seq, output))
            .await
            .map_err(|_| SinkError::Closed {
                sink: "output writer".to_string(),
            })?;
        self.next_seq = seq;
        Ok(())
    }

    pub async fn emit_all(&mut self, outputs: Vec<EngineOutput>) -> SinkResult<()> {
        for output in outputs {
            self.emit(output).await?;
        }
        Ok(())
    }

    /// Barrier over everything emitted so far
    pub fn barrier(&self) -> FlushBarrier {
        FlushBarrier {
            target: self.next_seq,
            written: self.written.clone(),
        }
    }

    /// Number of outputs queued but not yet written
    pub fn pending(&self) -> u64 {
        self.next_seq.saturating_sub(*self.written.borrow())
    }

    /// Stop accepting outputs, deliver what is queued and flush the sinks
    ///
    /// When delivery does not finish within `timeout` the writer is aborted
    /// and the outputs still queued are abandoned.
    pub async fn close(self, timeout: Duration) -> SinkResult<()> {
        let barrier = self.barrier();
        drop(self.tx);
        let mut writer = self.writer;

        match tokio::time::timeout(timeout, &mut writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Output writer task failed"),
            Err(_) => {
                writer.abort();
                let undelivered = self.next_seq.saturating_sub(*self.written.borrow());
                warn!(
                    undelivered = undelivered,
                    timeout_ms = timeout.as_millis() as u64,
                    "Output drain timed out, abandoning queued outputs"
                );
                return Err(SinkError::DrainTimeout {
                    undelivered,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }

        barrier.wait().await
    }
}

struct OutputWriter {
    metric_sink: Arc<dyn MetricSink>,
    alert_sink: Arc<dyn AlertSink>,
    policy: RetryPolicy,
    metrics: EngineMetrics,
}

impl OutputWriter {
    async fn run(self, mut rx: mpsc::Receiver<(u64, EngineOutput)>, written: watch::Sender<u64>) {
        debug!(
            metric_sink = self.metric_sink.name(),
            alert_sink = self.alert_sink.name(),
            "Output writer started"
        );

        while let Some((seq, output)) = rx.recv().await {
            if let Err(e) = self.deliver(&output).await {
                error!(error = %e, id = output.id(), "Sink closed, output writer stopping");
                return;
            }
            written.send_replace(seq);
        }

        if let Err(e) = self.metric_sink.flush().await {
            warn!(error = %e, "Metric sink flush failed");
        }
        if let Err(e) = self.alert_sink.flush().await {
            warn!(error = %e, "Alert sink flush failed");
        }

        info!("Output writer drained");
    }

    /// Write one output, retrying until it succeeds or the sink is closed
    async fn deliver(&self, output: &EngineOutput) -> SinkResult<()> {
        let mut attempt = 0u32;

        loop {
            let result = match output {
                EngineOutput::Metric(record) => self.metric_sink.write_metric(record).await,
                EngineOutput::Alert(alert) => self.alert_sink.write_alert(alert).await,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e @ SinkError::Closed { .. }) => return Err(e),
                Err(e) => {
                    self.metrics.sink_retries.inc();
                    let delay = self.policy.backoff(attempt);

                    if attempt >= self.policy.max_retries {
                        error!(
                            error = %e,
                            id = output.id(),
                            attempt = attempt + 1,
                            "Sink write still failing, holding back output"
                        );
                    } else {
                        warn!(
                            error = %e,
                            id = output.id(),
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Sink write failed, retrying"
                        );
                    }

                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_types::{Severity, ALERT_SOURCE, METRIC_SOURCE};
    use std::collections::BTreeMap;

    fn metric(id: &str) -> EngineOutput {
        EngineOutput::Metric(MetricRecord {
            metric_id: id.to_string(),
            timestamp: 5000,
            window_start: 0,
            window_end: 5000,
            metric_type: "PAGE_VIEWS_PER_SECOND".to_string(),
            value: 1.0,
            count: 5,
            dimensions: BTreeMap::new(),
            tags: vec![],
            source: METRIC_SOURCE.to_string(),
            revision: 0,
        })
    }

    fn alert(id: &str) -> EngineOutput {
        EngineOutput::Alert(AlertRecord {
            alert_id: id.to_string(),
            timestamp: 300_000,
            alert_type: "HIGH_BOUNCE_RATE".to_string(),
            severity: Severity::Medium,
            title: "High Bounce Rate Detected".to_string(),
            description: String::new(),
            pattern_matched: "SINGLE_PAGE_VIEW_WITHIN_WINDOW".to_string(),
            affected_keys: vec!["u1".to_string()],
            evidence: BTreeMap::new(),
            evidence_count: 1,
            context: BTreeMap::new(),
            window_start: 0,
            window_end: 300_000,
            recommended_action: String::new(),
            source: ALERT_SOURCE.to_string(),
        })
    }

    const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

    fn fast_config(queue_capacity: usize) -> SinkConfig {
        SinkConfig {
            max_retries: 2,
            base_backoff_ms: 1,
            max_backoff_ms: 4,
            queue_capacity,
        }
    }

    fn emitter(sink: &CollectingSink, config: &SinkConfig, metrics: EngineMetrics) -> OutputEmitter {
        OutputEmitter::new(Arc::new(sink.clone()), Arc::new(sink.clone()), config, metrics)
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        };

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_secs(1));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_outputs_are_delivered_in_order() {
        let sink = CollectingSink::new();
        let mut emitter = emitter(&sink, &fast_config(4), EngineMetrics::new());

        emitter.emit(metric("m1")).await.unwrap();
        emitter.emit(alert("a1")).await.unwrap();
        emitter.emit(metric("m2")).await.unwrap();
        emitter.close(DRAIN_TIMEOUT).await.unwrap();

        let ids: Vec<String> = sink.metrics().into_iter().map(|m| m.metric_id).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(sink.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_writes_are_retried_not_dropped() {
        let sink = CollectingSink::new();
        sink.fail_next_writes(3);
        let metrics = EngineMetrics::new();
        let mut emitter = emitter(&sink, &fast_config(4), metrics.clone());

        emitter.emit(metric("m1")).await.unwrap();
        emitter.barrier().wait().await.unwrap();

        assert_eq!(sink.metrics().len(), 1);
        assert_eq!(metrics.sink_retries.get(), 3);
        emitter.close(DRAIN_TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn test_barrier_waits_for_delivery() {
        let sink = CollectingSink::new();
        let mut emitter = emitter(&sink, &fast_config(8), EngineMetrics::new());

        assert!(emitter.barrier().is_reached());

        for i in 0..5 {
            emitter.emit(metric(&format!("m{}", i))).await.unwrap();
        }
        let barrier = emitter.barrier();
        barrier.wait().await.unwrap();

        assert_eq!(sink.metrics().len(), 5);
        assert_eq!(emitter.pending(), 0);
        emitter.close(DRAIN_TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let sink = CollectingSink::new();
        sink.set_paused(true);
        let mut emitter = emitter(&sink, &fast_config(1), EngineMetrics::new());

        // One output held by the writer, one in the queue
        emitter.emit(metric("m1")).await.unwrap();
        emitter.emit(metric("m2")).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), emitter.emit(metric("m3"))).await;
        assert!(blocked.is_err());

        sink.set_paused(false);
        emitter.emit(metric("m4")).await.unwrap();
        emitter.close(DRAIN_TIMEOUT).await.unwrap();

        assert_eq!(sink.metrics().len(), 3);
    }

    #[tokio::test]
    async fn test_closed_sink_stops_writer() {
        let sink = CollectingSink::new();
        sink.close();
        let mut emitter = emitter(&sink, &fast_config(4), EngineMetrics::new());

        emitter.emit(metric("m1")).await.unwrap();
        assert!(emitter.barrier().wait().await.is_err());
    }

    #[tokio::test]
    async fn test_close_abandons_outputs_after_timeout() {
        let sink = CollectingSink::new();
        sink.set_paused(true);
        let mut emitter = emitter(&sink, &fast_config(4), EngineMetrics::new());

        emitter.emit(metric("m1")).await.unwrap();
        emitter.emit(metric("m2")).await.unwrap();

        let closed = tokio::time::timeout(
            Duration::from_secs(2),
            emitter.close(Duration::from_millis(50)),
        )
        .await
        .expect("close must respect its timeout");

        assert!(matches!(
            closed,
            Err(SinkError::DrainTimeout { undelivered: 2, .. })
        ));
        assert!(sink.metrics().is_empty());
    }
}
