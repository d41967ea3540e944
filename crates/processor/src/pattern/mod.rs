//! Per-key pattern detection
//!
//! The [`PatternMatcher`] keeps a short, event-time ordered buffer of recent
//! events per key and evaluates a fixed catalog of [`PatternPredicate`]s over
//! aligned intervals of each predicate's horizon:
//!
//! - when the watermark passes an interval end, every key with events in that
//!   interval is evaluated once ([`PatternPredicate::evaluate`]);
//! - when an event arrives in a still-open interval,
//!   [`PatternPredicate::on_arrival`] sees the interval so far.
//!
//! Predicates fire independently; no deduplication across predicates is
//! done here. Buffers are bounded by the oldest open interval and by a
//! per-key event cap; an interval that lost events to the cap is skipped
//! rather than evaluated on partial evidence.
//!
//! ## Example
//!
//! ```rust
//! use analytics_types::{AnalyticsEvent, EventType};
//! use processor::pattern::{BounceDetection, PatternMatcher};
//! use processor::watermark::Watermark;
//!
//! let mut matcher = PatternMatcher::new(vec![Box::new(BounceDetection::new(300_000, "high_bounce"))], 100);
//!
//! let view = AnalyticsEvent::new("e1", 1_000, "user_1", EventType::PageView);
//! assert!(matcher.on_event(&view).is_empty());
//!
//! let alerts = matcher.advance(&Watermark::new(300_000));
//! assert_eq!(alerts.len(), 1);
//! assert_eq!(alerts[0].alert_id, "high_bounce_user_1_0");
//! ```

mod buffer;
mod predicate;

pub use buffer::{BufferedEvent, EventBuffer};
pub use predicate::{BounceDetection, HighActivityDetection, PatternPredicate};

use analytics_types::{AlertRecord, AnalyticsEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::config::PatternConfig;
use crate::error::{StateError, StateResult};
use crate::watermark::Watermark;
use crate::window::assigner::align_down;

/// Serialized form of the matcher
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PatternSnapshot {
    buffers: BTreeMap<String, EventBuffer>,
    /// Per predicate name: intervals ending at or before this are evaluated
    closed_until: BTreeMap<String, i64>,
}

/// Matcher statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternStats {
    pub buffered_keys: usize,
    pub buffered_events: usize,
    /// Events dropped because a key exceeded its buffer cap
    pub evicted_events: u64,
    /// Key intervals not evaluated because the cap dropped some of their events
    pub incomplete_intervals: u64,
    pub alerts: u64,
}

/// Evaluates pattern predicates over per-key event buffers
#[derive(Debug)]
pub struct PatternMatcher {
    predicates: Vec<Box<dyn PatternPredicate>>,
    closed_until: Vec<i64>,
    buffers: BTreeMap<String, EventBuffer>,
    max_buffer_events: usize,
    evicted_events: u64,
    incomplete_intervals: u64,
    alerts: u64,
}

impl PatternMatcher {
    pub fn new(predicates: Vec<Box<dyn PatternPredicate>>, max_buffer_events: usize) -> Self {
        let closed_until = vec![i64::MIN; predicates.len()];
        Self {
            predicates,
            closed_until,
            buffers: BTreeMap::new(),
            max_buffer_events: max_buffer_events.max(1),
            evicted_events: 0,
            incomplete_intervals: 0,
            alerts: 0,
        }
    }

    /// Matcher with the predicates enabled in `config`
    pub fn from_config(config: &PatternConfig) -> Self {
        let mut predicates: Vec<Box<dyn PatternPredicate>> = Vec::new();
        if config.bounce.enabled {
            predicates.push(Box::new(BounceDetection::from_config(&config.bounce)));
        }
        if config.high_activity.enabled {
            predicates.push(Box::new(HighActivityDetection::from_config(
                &config.high_activity,
            )));
        }
        Self::new(predicates, config.max_buffer_events)
    }

    pub fn predicates(&self) -> impl Iterator<Item = &str> {
        self.predicates.iter().map(|p| p.name())
    }

    /// Buffer an event and run arrival checks
    ///
    /// Predicates whose interval for the event has already been evaluated
    /// ignore it; if that holds for every predicate the event is not buffered.
    pub fn on_event(&mut self, event: &AnalyticsEvent) -> Vec<AlertRecord> {
        let t = event.event_time;
        let open: Vec<usize> = self
            .predicates
            .iter()
            .zip(&self.closed_until)
            .enumerate()
            .filter(|(_, (p, closed))| p.interval_of(t).end > **closed)
            .map(|(i, _)| i)
            .collect();

        if open.is_empty() {
            trace!(event_id = %event.id, key = %event.key, "Event outside open pattern intervals");
            return Vec::new();
        }

        let arrived = BufferedEvent::from(event);
        let buffer = self.buffers.entry(event.key.clone()).or_default();
        let evicted = buffer.insert(arrived.clone(), self.max_buffer_events);
        if evicted > 0 {
            self.evicted_events += evicted as u64;
            debug!(key = %event.key, evicted = evicted, "Pattern buffer full, evicted oldest events");
        }

        let mut alerts = Vec::new();
        for i in open {
            let predicate = &self.predicates[i];
            let interval = predicate.interval_of(t);
            if !buffer.is_complete(&interval) {
                continue;
            }
            let events: Vec<&BufferedEvent> = buffer.range(interval.start, interval.end).collect();
            if let Some(alert) = predicate.on_arrival(&event.key, &arrived, &interval, &events) {
                alerts.push(alert);
            }
        }

        self.alerts += alerts.len() as u64;
        alerts
    }

    /// Evaluate every interval the watermark has passed since the last call
    pub fn advance(&mut self, watermark: &Watermark) -> Vec<AlertRecord> {
        if watermark.is_min() || self.predicates.is_empty() {
            return Vec::new();
        }

        let w = watermark.timestamp;
        let mut alerts = Vec::new();

        for (predicate, closed_until) in self.predicates.iter().zip(self.closed_until.iter_mut()) {
            let horizon = predicate.horizon_ms();
            let closed = align_down(w, horizon.max(1), 0);
            if closed <= *closed_until {
                continue;
            }

            for (key, buffer) in &self.buffers {
                let events: Vec<&BufferedEvent> = buffer.range(*closed_until, closed).collect();

                let mut idx = 0;
                while idx < events.len() {
                    let interval = predicate.interval_of(events[idx].event_time);
                    let len = events[idx..]
                        .iter()
                        .take_while(|e| e.event_time < interval.end)
                        .count();

                    if !buffer.is_complete(&interval) {
                        self.incomplete_intervals += 1;
                        debug!(
                            key = %key,
                            predicate = predicate.name(),
                            window_start = interval.start,
                            "Skipping interval truncated by the buffer cap"
                        );
                    } else if let Some(alert) =
                        predicate.evaluate(key, &interval, &events[idx..idx + len])
                    {
                        alerts.push(alert);
                    }
                    idx += len;
                }
            }

            *closed_until = closed;
        }

        self.evict_closed();
        self.alerts += alerts.len() as u64;
        alerts
    }

    /// Drop events no predicate can still evaluate
    fn evict_closed(&mut self) {
        let Some(&horizon_floor) = self.closed_until.iter().min() else {
            return;
        };

        self.buffers.retain(|_, buffer| {
            buffer.evict_before(horizon_floor);
            !buffer.is_empty()
        });
    }

    pub fn buffer(&self, key: &str) -> Option<&EventBuffer> {
        self.buffers.get(key)
    }

    pub fn stats(&self) -> PatternStats {
        PatternStats {
            buffered_keys: self.buffers.len(),
            buffered_events: self.buffers.values().map(EventBuffer::len).sum(),
            evicted_events: self.evicted_events,
            incomplete_intervals: self.incomplete_intervals,
            alerts: self.alerts,
        }
    }

    pub fn snapshot(&self) -> StateResult<Vec<u8>> {
        let snapshot = PatternSnapshot {
            buffers: self.buffers.clone(),
            closed_until: self
                .predicates
                .iter()
                .zip(&self.closed_until)
                .map(|(p, closed)| (p.name().to_string(), *closed))
                .collect(),
        };

        bincode::serialize(&snapshot).map_err(|e| StateError::SerializationFailed {
            key: "pattern_state".to_string(),
            reason: e.to_string(),
        })
    }

    /// Replace buffers and progress with a snapshot
    ///
    /// Predicates missing from the snapshot start with nothing evaluated.
    pub fn restore(&mut self, blob: &[u8]) -> StateResult<()> {
        let snapshot: PatternSnapshot =
            bincode::deserialize(blob).map_err(|e| StateError::DeserializationFailed {
                key: "pattern_state".to_string(),
                reason: e.to_string(),
            })?;

        self.closed_until = self
            .predicates
            .iter()
            .map(|p| {
                snapshot
                    .closed_until
                    .get(p.name())
                    .copied()
                    .unwrap_or(i64::MIN)
            })
            .collect();
        self.buffers = snapshot.buffers;

        debug!(keys = self.buffers.len(), "Restored pattern buffers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_types::EventType;

    const H: i64 = 300_000;

    fn view(id: &str, user: &str, t: i64) -> AnalyticsEvent {
        AnalyticsEvent::new(id, t, user, EventType::PageView)
    }

    fn bounce_matcher() -> PatternMatcher {
        PatternMatcher::new(vec![Box::new(BounceDetection::new(H, "high_bounce"))], 100)
    }

    #[test]
    fn test_bounce_alert_per_key_and_interval() {
        let mut matcher = bounce_matcher();

        matcher.on_event(&view("e1", "u1", 1_000));
        matcher.on_event(&view("e2", "u2", 2_000));
        matcher.on_event(&view("e3", "u2", 3_000));
        matcher.on_event(&view("e4", "u1", H + 10));

        let alerts = matcher.advance(&Watermark::new(H));
        let ids: Vec<&str> = alerts.iter().map(|a| a.alert_id.as_str()).collect();
        assert_eq!(ids, vec!["high_bounce_u1_0"]);

        // Nothing is evaluated twice
        assert!(matcher.advance(&Watermark::new(H + 1)).is_empty());

        let alerts = matcher.advance(&Watermark::new(2 * H));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_id, format!("high_bounce_u1_{}", H));
    }

    #[test]
    fn test_out_of_order_events_within_open_interval() {
        let mut matcher = bounce_matcher();

        matcher.on_event(&view("e2", "u1", 200_000));
        matcher.on_event(&view("e1", "u1", 100_000));

        assert!(matcher.advance(&Watermark::new(H)).is_empty());
    }

    #[test]
    fn test_events_for_closed_intervals_are_ignored() {
        let mut matcher = bounce_matcher();
        matcher.on_event(&view("e1", "u1", 1_000));
        assert_eq!(matcher.advance(&Watermark::new(H)).len(), 1);

        // A second view for the evaluated interval cannot change the result
        matcher.on_event(&view("e2", "u1", 2_000));
        assert!(matcher.buffer("u1").is_none());
        assert!(matcher.advance(&Watermark::new(2 * H)).is_empty());
    }

    #[test]
    fn test_buffers_are_evicted_after_evaluation() {
        let mut matcher = bounce_matcher();
        matcher.on_event(&view("e1", "u1", 1_000));
        matcher.on_event(&view("e2", "u1", H + 1_000));

        matcher.advance(&Watermark::new(H));
        let stats = matcher.stats();
        assert_eq!(stats.buffered_keys, 1);
        assert_eq!(stats.buffered_events, 1);
        assert_eq!(stats.alerts, 1);
    }

    #[test]
    fn test_buffer_cap_counts_evictions() {
        let mut matcher =
            PatternMatcher::new(vec![Box::new(BounceDetection::new(H, "high_bounce"))], 2);
        for i in 0..5 {
            matcher.on_event(&view(&format!("e{}", i), "u1", i));
        }
        assert_eq!(matcher.stats().evicted_events, 3);
        assert_eq!(matcher.buffer("u1").unwrap().len(), 2);
    }

    #[test]
    fn test_truncated_interval_raises_no_bounce() {
        let mut matcher =
            PatternMatcher::new(vec![Box::new(BounceDetection::new(H, "high_bounce"))], 1);

        // Two views, one evicted: the survivor alone looks like a bounce
        matcher.on_event(&view("e1", "u1", 1_000));
        matcher.on_event(&view("e2", "u1", 2_000));
        assert!(matcher.advance(&Watermark::new(H)).is_empty());
        assert_eq!(matcher.stats().incomplete_intervals, 1);

        // Later intervals are complete again
        matcher.on_event(&view("e3", "u1", H + 10));
        let alerts = matcher.advance(&Watermark::new(2 * H));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_id, format!("high_bounce_u1_{}", H));
        assert_eq!(matcher.stats().incomplete_intervals, 1);
    }

    #[test]
    fn test_predicates_fire_independently() {
        let mut matcher = PatternMatcher::new(
            vec![
                Box::new(BounceDetection::new(H, "high_bounce")),
                Box::new(HighActivityDetection::new(60_000, 1, "high_activity")),
            ],
            100,
        );

        let on_arrival = matcher.on_event(&view("e1", "u1", 1_000));
        assert_eq!(on_arrival.len(), 1);
        assert_eq!(on_arrival[0].alert_type, "HIGH_ACTIVITY_BURST");

        let on_watermark = matcher.advance(&Watermark::new(H));
        assert_eq!(on_watermark.len(), 1);
        assert_eq!(on_watermark[0].alert_type, "HIGH_BOUNCE_RATE");
    }

    #[test]
    fn test_snapshot_restore_resumes_progress() {
        let mut matcher = bounce_matcher();
        matcher.on_event(&view("e1", "u1", 1_000));
        matcher.advance(&Watermark::new(H));
        matcher.on_event(&view("e2", "u2", H + 5));

        let blob = matcher.snapshot().unwrap();
        let mut restored = bounce_matcher();
        restored.restore(&blob).unwrap();

        // The first interval stays evaluated, the second is still pending
        restored.on_event(&view("e3", "u1", 2_000));
        let alerts = restored.advance(&Watermark::new(2 * H));
        let ids: Vec<&str> = alerts.iter().map(|a| a.alert_id.as_str()).collect();
        assert_eq!(ids, vec![format!("high_bounce_u2_{}", H)]);
    }

    #[test]
    fn test_minimum_watermark_evaluates_nothing() {
        let mut matcher = bounce_matcher();
        matcher.on_event(&view("e1", "u1", 1_000));
        assert!(matcher.advance(&Watermark::min()).is_empty());
        assert_eq!(matcher.stats().buffered_events, 1);
    }
}
