//! Metric records emitted by window firings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source tag written on every metric record
pub const METRIC_SOURCE: &str = "stream_analytics_engine";

/// Aggregate result of one fired window
///
/// `metric_id` is a deterministic function of the window identity and is safe
/// to use as an idempotency key downstream. A late-merge re-firing reuses the
/// same id with a higher `revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub metric_id: String,
    /// Event time of the result (the window end)
    pub timestamp: i64,
    pub window_start: i64,
    pub window_end: i64,
    pub metric_type: String,
    pub value: f64,
    pub count: u64,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: String,
    #[serde(default)]
    pub revision: u32,
}

impl MetricRecord {
    /// Window start as a UTC datetime
    pub fn window_start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.window_start)
    }

    /// Window end as a UTC datetime
    pub fn window_end_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.window_end)
    }

    /// Whether this record supersedes `other` for the same metric id
    pub fn supersedes(&self, other: &MetricRecord) -> bool {
        self.metric_id == other.metric_id && self.revision >= other.revision
    }
}
