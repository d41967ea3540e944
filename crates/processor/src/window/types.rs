//! Window types and bounds
//!
//! This module defines the core window types used for time-based aggregations
//! and event processing in the stream processor. All times are event times in
//! milliseconds since epoch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{WindowError, WindowResult};

/// Represents the time bounds of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowBounds {
    /// Start time of the window (inclusive)
    pub start: i64,
    /// End time of the window (exclusive)
    pub end: i64,
}

impl WindowBounds {
    /// Create new window bounds
    pub fn new(start: i64, end: i64) -> WindowResult<Self> {
        if start >= end {
            return Err(WindowError::InvalidBounds { start, end });
        }
        Ok(Self { start, end })
    }

    /// Create bounds of `size_ms` starting at `start`
    ///
    /// Sizes below one millisecond are widened to one millisecond so the
    /// `start < end` invariant always holds.
    pub fn with_size(start: i64, size_ms: i64) -> Self {
        Self {
            start,
            end: start.saturating_add(size_ms.max(1)),
        }
    }

    /// Get the duration of the window in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    /// Check if a timestamp falls within this window
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Check if this window overlaps with another window
    pub fn overlaps(&self, other: &WindowBounds) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Merge two windows into the smallest window covering both
    pub fn merge(&self, other: &WindowBounds) -> WindowBounds {
        WindowBounds {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Get the gap between two windows (returns None if windows overlap)
    pub fn gap(&self, other: &WindowBounds) -> Option<i64> {
        if self.overlaps(other) {
            return None;
        }

        if self.end <= other.start {
            Some(other.start - self.end)
        } else {
            Some(self.start - other.end)
        }
    }

    /// Start as a UTC datetime
    pub fn start_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.start).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// End as a UTC datetime
    pub fn end_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.end).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for WindowBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} - {})",
            self.start_time().format("%Y-%m-%d %H:%M:%S%.3f"),
            self.end_time().format("%Y-%m-%d %H:%M:%S%.3f")
        )
    }
}

impl PartialOrd for WindowBounds {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WindowBounds {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }
}

/// Window type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// Tumbling window (fixed-size, non-overlapping)
    Tumbling,
    /// Sliding window (fixed-size, overlapping)
    Sliding,
    /// Session window (gap-based, variable-size)
    Session,
}

impl fmt::Display for WindowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowType::Tumbling => write!(f, "tumbling"),
            WindowType::Sliding => write!(f, "sliding"),
            WindowType::Session => write!(f, "session"),
        }
    }
}

/// Identity of one window instance: metric definition, key and bounds
///
/// Ordered by metric, then key, then start, so all windows of one key and
/// definition are contiguous in ordered maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId {
    /// Name of the metric definition that owns the window
    pub metric: String,
    /// Grouping key
    pub key: String,
    /// Window start (inclusive)
    pub start: i64,
    /// Window end (exclusive)
    pub end: i64,
}

impl WindowId {
    pub fn new(metric: impl Into<String>, key: impl Into<String>, bounds: WindowBounds) -> Self {
        Self {
            metric: metric.into(),
            key: key.into(),
            start: bounds.start,
            end: bounds.end,
        }
    }

    /// Smallest id for a metric and key, for range scans
    pub fn lower_bound(metric: &str, key: &str) -> Self {
        Self {
            metric: metric.to_string(),
            key: key.to_string(),
            start: i64::MIN,
            end: i64::MIN,
        }
    }

    pub fn bounds(&self) -> WindowBounds {
        WindowBounds {
            start: self.start,
            end: self.end,
        }
    }

    /// Whether the id belongs to the given metric and key
    pub fn belongs_to(&self, metric: &str, key: &str) -> bool {
        self.metric == metric && self.key == key
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}_{}", self.metric, self.key, self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_bounds_creation() {
        let bounds = WindowBounds::new(1000, 2000).unwrap();
        assert_eq!(bounds.start, 1000);
        assert_eq!(bounds.end, 2000);
        assert_eq!(bounds.duration_ms(), 1000);
    }

    #[test]
    fn test_window_bounds_invalid() {
        assert!(matches!(
            WindowBounds::new(2000, 1000),
            Err(WindowError::InvalidBounds { .. })
        ));
        assert!(WindowBounds::new(1000, 1000).is_err());
    }

    #[test]
    fn test_with_size_never_empty() {
        let bounds = WindowBounds::with_size(10, 0);
        assert_eq!(bounds.end, 11);
    }

    #[test]
    fn test_window_bounds_contains() {
        let bounds = WindowBounds::new(1000, 2000).unwrap();

        assert!(!bounds.contains(999));
        assert!(bounds.contains(1000));
        assert!(bounds.contains(1500));
        assert!(!bounds.contains(2000));
    }

    #[test]
    fn test_window_bounds_overlaps_and_merge() {
        let a = WindowBounds::new(1000, 2000).unwrap();
        let b = WindowBounds::new(1500, 2500).unwrap();
        let c = WindowBounds::new(2000, 3000).unwrap();

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert_eq!(a.merge(&b), WindowBounds::new(1000, 2500).unwrap());
    }

    #[test]
    fn test_window_bounds_gap() {
        let a = WindowBounds::new(1000, 2000).unwrap();
        let b = WindowBounds::new(2500, 3000).unwrap();

        assert_eq!(a.gap(&b), Some(500));
        assert_eq!(b.gap(&a), Some(500));
        assert_eq!(a.gap(&a), None);
    }

    #[test]
    fn test_window_id_ordering_groups_keys() {
        let bounds = WindowBounds::new(0, 10).unwrap();
        let later = WindowBounds::new(10, 20).unwrap();
        let a1 = WindowId::new("m", "a", bounds);
        let a2 = WindowId::new("m", "a", later);
        let b1 = WindowId::new("m", "b", bounds);

        assert!(WindowId::lower_bound("m", "a") < a1);
        assert!(a1 < a2);
        assert!(a2 < b1);
        assert!(a1.belongs_to("m", "a"));
        assert!(!b1.belongs_to("m", "a"));
        assert_eq!(a2.to_string(), "m/a/10_20");
    }
}
