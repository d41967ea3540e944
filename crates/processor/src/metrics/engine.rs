//! Engine counters and gauges

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;

use super::MetricsRegistry;

/// Labels for per-definition window metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WindowLabels {
    pub metric: String,
}

/// Labels for alert metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AlertLabels {
    pub alert_type: String,
}

/// Operational metrics of one engine worker
#[derive(Clone, Debug, Default)]
pub struct EngineMetrics {
    pub events_processed: Counter,
    pub decode_errors: Counter,
    pub late_events: Counter,
    pub windows_fired: Family<WindowLabels, Counter>,
    pub windows_refired: Family<WindowLabels, Counter>,
    pub windows_purged: Counter,
    pub alerts_emitted: Family<AlertLabels, Counter>,
    pub checkpoints_completed: Counter,
    pub checkpoints_failed: Counter,
    pub sink_retries: Counter,
    pub watermark_ms: Gauge,
    pub active_windows: Gauge,
    pub checkpoint_lag_ms: Gauge,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register all metrics into a registry
    pub fn register(&self, registry: &MetricsRegistry) {
        let registry = registry.registry();
        let mut registry = registry.write();

        registry.register(
            "events_processed",
            "Events accepted into at least one window or pattern buffer",
            self.events_processed.clone(),
        );
        registry.register(
            "decode_errors",
            "Records skipped because they could not be decoded",
            self.decode_errors.clone(),
        );
        registry.register(
            "late_events",
            "Events dropped for arriving after the allowed lateness",
            self.late_events.clone(),
        );
        registry.register(
            "windows_fired",
            "Windows fired for the first time",
            self.windows_fired.clone(),
        );
        registry.register(
            "windows_refired",
            "Late-merge re-firings of already fired windows",
            self.windows_refired.clone(),
        );
        registry.register(
            "windows_purged",
            "Windows whose state was discarded",
            self.windows_purged.clone(),
        );
        registry.register(
            "alerts_emitted",
            "Pattern alerts emitted",
            self.alerts_emitted.clone(),
        );
        registry.register(
            "checkpoints_completed",
            "Checkpoints persisted successfully",
            self.checkpoints_completed.clone(),
        );
        registry.register(
            "checkpoints_failed",
            "Checkpoint attempts that were discarded",
            self.checkpoints_failed.clone(),
        );
        registry.register(
            "sink_retries",
            "Failed sink writes that were retried",
            self.sink_retries.clone(),
        );
        registry.register(
            "watermark_ms",
            "Current event-time watermark in milliseconds",
            self.watermark_ms.clone(),
        );
        registry.register(
            "active_windows",
            "Windows currently held in keyed state",
            self.active_windows.clone(),
        );
        registry.register(
            "checkpoint_lag_ms",
            "Wall-clock time since the last completed checkpoint",
            self.checkpoint_lag_ms.clone(),
        );
    }

    pub fn record_fired(&self, metric: &str, revision: u32) {
        let labels = WindowLabels {
            metric: metric.to_string(),
        };
        if revision == 0 {
            self.windows_fired.get_or_create(&labels).inc();
        } else {
            self.windows_refired.get_or_create(&labels).inc();
        }
    }

    pub fn record_alert(&self, alert_type: &str) {
        self.alerts_emitted
            .get_or_create(&AlertLabels {
                alert_type: alert_type.to_string(),
            })
            .inc();
    }
}
