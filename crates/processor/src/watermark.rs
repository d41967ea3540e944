//! Watermarking system for handling late events in stream processing
//!
//! Watermarks represent an event-time threshold asserting that no more events
//! with timestamps below it are expected. They drive window firing, pattern
//! interval evaluation and buffer eviction.
//!
//! # Overview
//!
//! The watermarking system supports:
//! - Bounded out-of-orderness handling
//! - Per-partition watermark tracking
//! - Idle partition detection
//! - Late event detection and accounting
//!
//! # Example
//!
//! ```rust
//! use processor::watermark::{BoundedOutOfOrdernessWatermark, WatermarkGenerator};
//! use std::time::Duration;
//!
//! let mut generator = BoundedOutOfOrdernessWatermark::new(
//!     Duration::from_secs(10),  // 10 second max out-of-orderness
//!     Some(Duration::from_secs(60)) // 60 second idle timeout
//! );
//!
//! // Process an event with timestamp 20000ms on partition 0
//! let advanced = generator.on_event(20_000, 0);
//! assert_eq!(advanced.map(|wm| wm.timestamp), Some(10_000));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Represents a watermark timestamp
///
/// Watermarks indicate that all events with timestamps less than the watermark
/// are expected to have been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    /// The watermark timestamp in milliseconds since epoch
    pub timestamp: i64,
}

impl Watermark {
    /// Creates a new watermark with the given timestamp
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }

    /// Creates a watermark from a DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            timestamp: dt.timestamp_millis(),
        }
    }

    /// Converts the watermark to a DateTime, if it is representable
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Returns the minimum possible watermark (beginning of time)
    pub fn min() -> Self {
        Self { timestamp: i64::MIN }
    }

    /// Returns the maximum possible watermark (end of time)
    pub fn max() -> Self {
        Self { timestamp: i64::MAX }
    }

    /// Checks if this watermark is before the given timestamp
    pub fn is_before(&self, timestamp: i64) -> bool {
        self.timestamp < timestamp
    }

    /// Checks if this watermark is after the given timestamp
    pub fn is_after(&self, timestamp: i64) -> bool {
        self.timestamp > timestamp
    }

    /// Returns true if this is the minimum watermark
    pub fn is_min(&self) -> bool {
        self.timestamp == i64::MIN
    }

    /// Returns true if this is the maximum watermark
    pub fn is_max(&self) -> bool {
        self.timestamp == i64::MAX
    }

    /// Whether an event at `timestamp` is too late to be accepted
    ///
    /// Late means strictly below `watermark - allowed_lateness`. Nothing is late
    /// before the first watermark has been established.
    pub fn is_late(&self, timestamp: i64, allowed_lateness_ms: i64) -> bool {
        !self.is_min() && timestamp < self.timestamp.saturating_sub(allowed_lateness_ms)
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::min()
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_min() {
            return write!(f, "Watermark(-inf)");
        }
        match self.to_datetime() {
            Some(dt) => write!(f, "Watermark({})", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
            None => write!(f, "Watermark({})", self.timestamp),
        }
    }
}

/// Trait for generating watermarks from event streams
pub trait WatermarkGenerator: Send + Sync {
    /// Called when a new event arrives
    ///
    /// # Returns
    /// The new watermark if the event advanced it
    fn on_event(&mut self, timestamp: i64, partition: u32) -> Option<Watermark>;

    /// Called periodically to re-evaluate idle partitions
    ///
    /// # Returns
    /// The new watermark if excluding idle partitions advanced it
    fn on_periodic_check(&mut self) -> Option<Watermark>;

    /// Gets the current watermark without advancing it
    fn current_watermark(&self) -> Watermark;

    /// Resets the watermark generator to its initial state
    fn reset(&mut self);

    /// Gets the watermark for a specific partition
    fn partition_watermark(&self, partition: u32) -> Option<Watermark>;
}

/// Configuration for bounded out-of-orderness watermarking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedOutOfOrdernessConfig {
    /// Maximum allowed out-of-orderness (delay to apply)
    pub max_out_of_orderness: Duration,
    /// Timeout after which a partition is considered idle
    pub idle_timeout: Option<Duration>,
}

impl Default for BoundedOutOfOrdernessConfig {
    fn default() -> Self {
        Self {
            max_out_of_orderness: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Serializable watermark tracker state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkSnapshot {
    /// Merged engine watermark
    pub current: i64,
    /// Maximum event time seen per partition
    pub partition_max: BTreeMap<u32, i64>,
}

/// Bounded out-of-orderness watermark generator
///
/// Tracks the maximum timestamp seen per partition and derives each partition
/// watermark by subtracting a fixed delay. The engine watermark is the minimum
/// over active partitions and never moves backwards.
///
/// # Example
///
/// ```rust
/// use processor::watermark::{BoundedOutOfOrdernessWatermark, WatermarkGenerator};
/// use std::time::Duration;
///
/// let mut generator = BoundedOutOfOrdernessWatermark::new(Duration::from_secs(5), None);
///
/// generator.on_event(10_000, 0);
/// generator.on_event(20_000, 1);
/// // min(10000, 20000) - 5000
/// assert_eq!(generator.current_watermark().timestamp, 5_000);
/// ```
#[derive(Debug)]
pub struct BoundedOutOfOrdernessWatermark {
    /// Per-partition maximum timestamps
    partition_max_timestamps: BTreeMap<u32, i64>,
    /// Per-partition last activity time (wall clock)
    partition_last_activity: HashMap<u32, Instant>,
    /// Configuration
    config: BoundedOutOfOrdernessConfig,
    /// Current merged watermark
    current_watermark: Watermark,
}

impl BoundedOutOfOrdernessWatermark {
    /// Creates a new bounded out-of-orderness watermark generator
    ///
    /// # Arguments
    /// * `max_out_of_orderness` - The maximum expected delay of out-of-order events
    /// * `idle_timeout` - Optional timeout for detecting idle partitions
    pub fn new(max_out_of_orderness: Duration, idle_timeout: Option<Duration>) -> Self {
        Self::with_config(BoundedOutOfOrdernessConfig {
            max_out_of_orderness,
            idle_timeout,
        })
    }

    /// Creates a new watermark generator with custom configuration
    pub fn with_config(config: BoundedOutOfOrdernessConfig) -> Self {
        Self {
            partition_max_timestamps: BTreeMap::new(),
            partition_last_activity: HashMap::new(),
            config,
            current_watermark: Watermark::min(),
        }
    }

    /// Computes the watermark based on the maximum timestamp and configured delay
    fn compute_watermark(&self, max_ts: i64) -> Watermark {
        let delay_ms = self.config.max_out_of_orderness.as_millis() as i64;
        Watermark::new(max_ts.saturating_sub(delay_ms))
    }

    /// Updates the partition activity timestamp
    fn update_partition_activity(&mut self, partition: u32) {
        self.partition_last_activity.insert(partition, Instant::now());
    }

    /// Checks if a partition is idle based on the configured timeout
    fn is_partition_idle(&self, partition: u32) -> bool {
        match (self.config.idle_timeout, self.partition_last_activity.get(&partition)) {
            (Some(timeout), Some(last_activity)) => last_activity.elapsed() > timeout,
            _ => false,
        }
    }

    /// Gets all active partitions (non-idle)
    pub fn active_partitions(&self) -> Vec<u32> {
        self.partition_max_timestamps
            .keys()
            .copied()
            .filter(|partition| !self.is_partition_idle(*partition))
            .collect()
    }

    /// Gets all idle partitions
    pub fn idle_partitions(&self) -> Vec<u32> {
        self.partition_max_timestamps
            .keys()
            .copied()
            .filter(|partition| self.is_partition_idle(*partition))
            .collect()
    }

    /// Merges partition watermarks to compute the engine watermark
    ///
    /// The minimum over active partitions, so a lagging partition holds back
    /// firing until it catches up or goes idle.
    fn merge_partition_watermarks(&self) -> Option<Watermark> {
        self.partition_max_timestamps
            .iter()
            .filter(|(partition, _)| !self.is_partition_idle(**partition))
            .map(|(_, max_ts)| self.compute_watermark(*max_ts))
            .min()
    }

    /// Moves the current watermark forward if `candidate` is ahead of it
    fn advance_to(&mut self, candidate: Option<Watermark>) -> Option<Watermark> {
        let new_watermark = candidate?;
        if new_watermark > self.current_watermark {
            self.current_watermark = new_watermark;
            Some(new_watermark)
        } else {
            None
        }
    }

    /// Checks if an event is late based on the current watermark
    pub fn is_late_event(&self, timestamp: i64) -> bool {
        self.current_watermark.is_late(timestamp, 0)
    }

    /// Gets the lateness of an event (how far it is behind the watermark)
    ///
    /// Returns 0 if the event is not behind the watermark
    pub fn get_lateness(&self, timestamp: i64) -> i64 {
        if self.current_watermark.is_min() || timestamp >= self.current_watermark.timestamp {
            0
        } else {
            self.current_watermark.timestamp - timestamp
        }
    }

    /// Captures the tracker state for a checkpoint
    pub fn snapshot(&self) -> WatermarkSnapshot {
        WatermarkSnapshot {
            current: self.current_watermark.timestamp,
            partition_max: self.partition_max_timestamps.clone(),
        }
    }

    /// Restores tracker state from a checkpoint
    ///
    /// Restored partitions count as active from now on.
    pub fn restore(&mut self, snapshot: &WatermarkSnapshot) {
        self.partition_max_timestamps = snapshot.partition_max.clone();
        let now = Instant::now();
        self.partition_last_activity = snapshot
            .partition_max
            .keys()
            .map(|partition| (*partition, now))
            .collect();
        self.current_watermark = Watermark::new(snapshot.current);
        debug!(watermark = %self.current_watermark, "Restored watermark tracker");
    }
}

impl WatermarkGenerator for BoundedOutOfOrdernessWatermark {
    fn on_event(&mut self, timestamp: i64, partition: u32) -> Option<Watermark> {
        trace!(
            timestamp = timestamp,
            partition = partition,
            "Processing event for watermark"
        );

        self.update_partition_activity(partition);

        self.partition_max_timestamps
            .entry(partition)
            .and_modify(|max_ts| *max_ts = (*max_ts).max(timestamp))
            .or_insert(timestamp);

        let advanced = self.advance_to(self.merge_partition_watermarks());
        if let Some(watermark) = advanced {
            trace!(watermark = %watermark, "Advanced watermark");
        }
        advanced
    }

    fn on_periodic_check(&mut self) -> Option<Watermark> {
        let idle = self.idle_partitions();
        if !idle.is_empty() {
            warn!(partitions = ?idle, "Detected idle partitions");
        }

        let advanced = self.advance_to(self.merge_partition_watermarks());
        if let Some(watermark) = advanced {
            debug!(watermark = %watermark, "Periodic watermark update");
        }
        advanced
    }

    fn current_watermark(&self) -> Watermark {
        self.current_watermark
    }

    fn reset(&mut self) {
        self.partition_max_timestamps.clear();
        self.partition_last_activity.clear();
        self.current_watermark = Watermark::min();
        debug!("Watermark generator reset");
    }

    fn partition_watermark(&self, partition: u32) -> Option<Watermark> {
        self.partition_max_timestamps
            .get(&partition)
            .map(|max_ts| self.compute_watermark(*max_ts))
    }
}

/// Handler for late events
///
/// Classifies events that arrive behind the watermark: within the allowed
/// lateness they are accepted (and may re-fire a window), beyond it they are
/// dropped and counted.
#[derive(Debug)]
pub struct LateEventHandler {
    /// Maximum allowed lateness in milliseconds
    allowed_lateness: i64,
    /// Whether to log late events
    log_late_events: bool,
    /// Count of dropped late events
    dropped_count: AtomicU64,
    /// Count of accepted late events
    accepted_count: AtomicU64,
    /// Total lateness of accepted events
    total_lateness: AtomicI64,
}

impl LateEventHandler {
    /// Creates a new late event handler
    pub fn new(allowed_lateness_ms: i64, log_late_events: bool) -> Self {
        Self {
            allowed_lateness: allowed_lateness_ms.max(0),
            log_late_events,
            dropped_count: AtomicU64::new(0),
            accepted_count: AtomicU64::new(0),
            total_lateness: AtomicI64::new(0),
        }
    }

    pub fn allowed_lateness_ms(&self) -> i64 {
        self.allowed_lateness
    }

    /// Handles an event that is `lateness` ms behind the watermark
    ///
    /// # Returns
    /// True if the event should be processed, false if it must be dropped
    pub fn handle_late_event(&self, lateness: i64, partition: u32) -> bool {
        if lateness <= 0 {
            return true;
        }

        if lateness > self.allowed_lateness {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);

            if self.log_late_events {
                warn!(
                    lateness_ms = lateness,
                    allowed_lateness_ms = self.allowed_lateness,
                    partition = partition,
                    "Dropping late event beyond allowed lateness"
                );
            }

            false
        } else {
            self.accepted_count.fetch_add(1, Ordering::Relaxed);
            self.total_lateness.fetch_add(lateness, Ordering::Relaxed);

            if self.log_late_events {
                debug!(
                    lateness_ms = lateness,
                    partition = partition,
                    "Accepting late event within allowed lateness"
                );
            }

            true
        }
    }

    /// Gets statistics about late event handling
    pub fn get_stats(&self) -> LateEventStats {
        let dropped = self.dropped_count.load(Ordering::Relaxed);
        let accepted = self.accepted_count.load(Ordering::Relaxed);
        let total_lateness = self.total_lateness.load(Ordering::Relaxed);

        let avg_lateness = if accepted > 0 {
            total_lateness / accepted as i64
        } else {
            0
        };

        LateEventStats {
            dropped_count: dropped,
            accepted_count: accepted,
            average_lateness_ms: avg_lateness,
        }
    }

    /// Resets the statistics
    pub fn reset_stats(&self) {
        self.dropped_count.store(0, Ordering::Relaxed);
        self.accepted_count.store(0, Ordering::Relaxed);
        self.total_lateness.store(0, Ordering::Relaxed);
    }
}

/// Statistics for late event handling
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateEventStats {
    /// Number of dropped late events
    pub dropped_count: u64,
    /// Number of accepted late events
    pub accepted_count: u64,
    /// Average lateness in milliseconds
    pub average_lateness_ms: i64,
}
