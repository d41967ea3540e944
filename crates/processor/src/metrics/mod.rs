//! Prometheus metrics for the analytics engine
//!
//! Engine counters and gauges are plain `prometheus_client` metrics held by
//! [`EngineMetrics`]. They are cheap to clone and can be registered into a
//! [`MetricsRegistry`] for text exposition.

mod engine;
mod registry;

pub use engine::{AlertLabels, EngineMetrics, WindowLabels};
pub use registry::{MetricsRegistry, METRICS_REGISTRY, METRIC_PREFIX};

use thiserror::Error;

/// Errors that can occur in the metrics subsystem
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metric encoding error: {0}")]
    EncodingError(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
