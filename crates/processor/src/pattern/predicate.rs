//! Pattern predicates
//!
//! Predicates are pure: given a key, an interval and the key's buffered
//! events in that interval they decide whether an alert exists. They never
//! perform I/O and never look at wall-clock time.

use analytics_types::{AlertRecord, EventType, Severity, ALERT_SOURCE};
use std::collections::BTreeMap;
use std::fmt;

use super::buffer::BufferedEvent;
use crate::config::{BounceConfig, HighActivityConfig};
use crate::window::assigner::align_down;
use crate::window::WindowBounds;

/// A per-key predicate evaluated over aligned intervals of `horizon_ms`
pub trait PatternPredicate: Send + Sync + fmt::Debug {
    /// Stable name, used to key matcher progress in snapshots
    fn name(&self) -> &str;

    fn horizon_ms(&self) -> i64;

    /// Evaluate an interval the watermark has passed
    fn evaluate(
        &self,
        key: &str,
        interval: &WindowBounds,
        events: &[&BufferedEvent],
    ) -> Option<AlertRecord>;

    /// Evaluate the still-open interval `arrived` just landed in; `events`
    /// includes it
    fn on_arrival(
        &self,
        _key: &str,
        _arrived: &BufferedEvent,
        _interval: &WindowBounds,
        _events: &[&BufferedEvent],
    ) -> Option<AlertRecord> {
        None
    }

    /// Aligned interval containing `timestamp`
    fn interval_of(&self, timestamp: i64) -> WindowBounds {
        let horizon = self.horizon_ms().max(1);
        WindowBounds::with_size(align_down(timestamp, horizon, 0), horizon)
    }
}

fn page_views(events: &[&BufferedEvent]) -> usize {
    events
        .iter()
        .filter(|e| e.event_type == EventType::PageView)
        .count()
}

fn describe_horizon(horizon_ms: i64) -> String {
    if horizon_ms % 60_000 == 0 {
        format!("{}-minute", horizon_ms / 60_000)
    } else if horizon_ms % 1_000 == 0 {
        format!("{}-second", horizon_ms / 1_000)
    } else {
        format!("{}ms", horizon_ms)
    }
}

fn interval_context(interval: &WindowBounds) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("window_start".to_string(), interval.start.to_string()),
        ("window_end".to_string(), interval.end.to_string()),
    ])
}

/// Exactly one page view from a key within an interval
#[derive(Debug, Clone)]
pub struct BounceDetection {
    horizon_ms: i64,
    id_prefix: String,
}

impl BounceDetection {
    pub const ALERT_TYPE: &'static str = "HIGH_BOUNCE_RATE";

    pub fn new(horizon_ms: i64, id_prefix: impl Into<String>) -> Self {
        Self {
            horizon_ms: horizon_ms.max(1),
            id_prefix: id_prefix.into(),
        }
    }

    pub fn from_config(config: &BounceConfig) -> Self {
        Self::new(config.horizon_ms as i64, config.id_prefix.clone())
    }
}

impl PatternPredicate for BounceDetection {
    fn name(&self) -> &str {
        Self::ALERT_TYPE
    }

    fn horizon_ms(&self) -> i64 {
        self.horizon_ms
    }

    fn evaluate(
        &self,
        key: &str,
        interval: &WindowBounds,
        events: &[&BufferedEvent],
    ) -> Option<AlertRecord> {
        if page_views(events) != 1 {
            return None;
        }

        Some(AlertRecord {
            alert_id: format!("{}_{}_{}", self.id_prefix, key, interval.start),
            timestamp: interval.end,
            alert_type: Self::ALERT_TYPE.to_string(),
            severity: Severity::Medium,
            title: "High Bounce Rate Detected".to_string(),
            description: format!(
                "User {} viewed only one page in {} window",
                key,
                describe_horizon(self.horizon_ms)
            ),
            pattern_matched: "SINGLE_PAGE_VIEW_WITHIN_WINDOW".to_string(),
            affected_keys: vec![key.to_string()],
            evidence: BTreeMap::from([("page_views".to_string(), 1.0)]),
            evidence_count: 1,
            context: interval_context(interval),
            window_start: interval.start,
            window_end: interval.end,
            recommended_action: "Review page content and user experience".to_string(),
            source: ALERT_SOURCE.to_string(),
        })
    }
}

/// A burst of page views from one key within an interval
#[derive(Debug, Clone)]
pub struct HighActivityDetection {
    horizon_ms: i64,
    threshold: usize,
    id_prefix: String,
}

impl HighActivityDetection {
    pub const ALERT_TYPE: &'static str = "HIGH_ACTIVITY_BURST";

    pub fn new(horizon_ms: i64, threshold: u64, id_prefix: impl Into<String>) -> Self {
        Self {
            horizon_ms: horizon_ms.max(1),
            threshold: threshold.max(1) as usize,
            id_prefix: id_prefix.into(),
        }
    }

    pub fn from_config(config: &HighActivityConfig) -> Self {
        Self::new(
            config.horizon_ms as i64,
            config.threshold,
            config.id_prefix.clone(),
        )
    }
}

impl PatternPredicate for HighActivityDetection {
    fn name(&self) -> &str {
        Self::ALERT_TYPE
    }

    fn horizon_ms(&self) -> i64 {
        self.horizon_ms
    }

    // Alerts on arrival only
    fn evaluate(
        &self,
        _key: &str,
        _interval: &WindowBounds,
        _events: &[&BufferedEvent],
    ) -> Option<AlertRecord> {
        None
    }

    /// Fires on the page view that brings the count to exactly the
    /// threshold, so each key and interval alerts at most once.
    fn on_arrival(
        &self,
        key: &str,
        arrived: &BufferedEvent,
        interval: &WindowBounds,
        events: &[&BufferedEvent],
    ) -> Option<AlertRecord> {
        if arrived.event_type != EventType::PageView {
            return None;
        }
        let count = page_views(events);
        if count != self.threshold {
            return None;
        }

        Some(AlertRecord {
            alert_id: format!("{}_{}_{}", self.id_prefix, key, interval.start),
            timestamp: interval.end,
            alert_type: Self::ALERT_TYPE.to_string(),
            severity: Severity::Low,
            title: "High Activity Detected".to_string(),
            description: format!(
                "User {} viewed {} pages in {} window",
                key,
                count,
                describe_horizon(self.horizon_ms)
            ),
            pattern_matched: "PAGE_VIEW_BURST_WITHIN_WINDOW".to_string(),
            affected_keys: vec![key.to_string()],
            evidence: BTreeMap::from([("page_views".to_string(), count as f64)]),
            evidence_count: count as u64,
            context: interval_context(interval),
            window_start: interval.start,
            window_end: interval.end,
            recommended_action: "Check for automated traffic".to_string(),
            source: ALERT_SOURCE.to_string(),
        })
    }
}
