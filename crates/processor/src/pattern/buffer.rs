use analytics_types::{AnalyticsEvent, EventType};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::window::WindowBounds;

/// The parts of an event the predicates look at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedEvent {
    pub event_id: String,
    pub event_time: i64,
    pub event_type: EventType,
}

impl From<&AnalyticsEvent> for BufferedEvent {
    fn from(event: &AnalyticsEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            event_time: event.event_time,
            event_type: event.event_type,
        }
    }
}

/// Recent events of one key, ordered by event time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBuffer {
    events: VecDeque<BufferedEvent>,
    /// Latest event time dropped by the capacity cap
    truncated_through: Option<i64>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert in event-time order, evicting the oldest events beyond
    /// `max_events`. Returns the number of evicted events.
    pub fn insert(&mut self, event: BufferedEvent, max_events: usize) -> usize {
        // Equal timestamps keep arrival order
        let idx = self
            .events
            .partition_point(|e| e.event_time <= event.event_time);
        self.events.insert(idx, event);

        let mut evicted = 0;
        while self.events.len() > max_events.max(1) {
            if let Some(dropped) = self.events.pop_front() {
                self.truncated_through = Some(
                    self.truncated_through
                        .map_or(dropped.event_time, |t| t.max(dropped.event_time)),
                );
            }
            evicted += 1;
        }
        evicted
    }

    /// Whether no event of `interval` was dropped by the capacity cap
    pub fn is_complete(&self, interval: &WindowBounds) -> bool {
        self.truncated_through
            .map_or(true, |through| through < interval.start)
    }

    /// Events with `start <= event_time < end`
    pub fn range(&self, start: i64, end: i64) -> impl Iterator<Item = &BufferedEvent> {
        let from = self.events.partition_point(|e| e.event_time < start);
        self.events
            .range(from..)
            .take_while(move |e| e.event_time < end)
    }

    /// Drop events older than `timestamp`
    pub fn evict_before(&mut self, timestamp: i64) -> usize {
        let count = self.events.partition_point(|e| e.event_time < timestamp);
        self.events.drain(..count);
        if self.truncated_through.is_some_and(|through| through < timestamp) {
            self.truncated_through = None;
        }
        count
    }

    pub fn oldest(&self) -> Option<i64> {
        self.events.front().map(|e| e.event_time)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, t: i64) -> BufferedEvent {
        BufferedEvent {
            event_id: id.to_string(),
            event_time: t,
            event_type: EventType::PageView,
        }
    }

    #[test]
    fn test_insert_keeps_event_time_order() {
        let mut buffer = EventBuffer::new();
        buffer.insert(event("c", 30), 10);
        buffer.insert(event("a", 10), 10);
        buffer.insert(event("b", 20), 10);
        buffer.insert(event("b2", 20), 10);

        let ids: Vec<&str> = buffer.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "b2", "c"]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut buffer = EventBuffer::new();
        assert_eq!(buffer.insert(event("a", 10), 2), 0);
        assert_eq!(buffer.insert(event("b", 20), 2), 0);
        assert_eq!(buffer.insert(event("c", 5), 2), 1);

        assert_eq!(buffer.oldest(), Some(10));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_capacity_eviction_marks_intervals_incomplete() {
        let mut buffer = EventBuffer::new();
        for t in [10, 20, 30] {
            buffer.insert(event(&t.to_string(), t), 2);
        }

        assert!(!buffer.is_complete(&WindowBounds::new(0, 100).unwrap()));
        assert!(buffer.is_complete(&WindowBounds::new(100, 200).unwrap()));

        buffer.evict_before(100);
        assert!(buffer.is_complete(&WindowBounds::new(0, 100).unwrap()));
    }

    #[test]
    fn test_range_and_evict() {
        let mut buffer = EventBuffer::new();
        for t in [0, 100, 299, 300, 450] {
            buffer.insert(event(&t.to_string(), t), 10);
        }

        assert_eq!(buffer.range(0, 300).count(), 3);
        assert_eq!(buffer.range(300, 600).count(), 2);
        assert_eq!(buffer.range(600, 900).count(), 0);

        assert_eq!(buffer.evict_before(300), 3);
        assert_eq!(buffer.oldest(), Some(300));
    }
}
