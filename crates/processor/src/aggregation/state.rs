use analytics_types::EventType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed-point scale of [`AggregateState::sum_micros`]
pub const SUM_SCALE: f64 = 1_000_000.0;

/// Incremental accumulator for one window instance
///
/// Every field combines associatively and commutatively, so the final state of
/// a window does not depend on the order in which its events arrived, and two
/// session windows can be merged by merging their states. Values are summed in
/// integer micro-units; float addition would not be associative.
///
/// # Examples
///
/// ```
/// use analytics_types::EventType;
/// use processor::aggregation::AggregateState;
///
/// let mut a = AggregateState::new();
/// a.add(1_000, EventType::PageView, None);
///
/// let mut b = AggregateState::new();
/// b.add(3_000, EventType::Conversion, Some(25.0));
///
/// a.merge(&b);
/// assert_eq!(a.count, 2);
/// assert_eq!(a.count_of(EventType::Conversion), 1);
/// assert_eq!(a.first_event_time, Some(1_000));
/// assert_eq!(a.last_event_time, Some(3_000));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    /// Number of events added
    pub count: u64,
    /// Number of events that carried a numeric value
    pub value_count: u64,
    /// Sum of numeric values in millionths
    pub sum_micros: i128,
    /// Smallest numeric value
    pub min: Option<f64>,
    /// Largest numeric value
    pub max: Option<f64>,
    /// Earliest event time seen
    pub first_event_time: Option<i64>,
    /// Latest event time seen
    pub last_event_time: Option<i64>,
    /// Events per type
    pub type_counts: BTreeMap<EventType, u64>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single event
    pub fn add(&mut self, event_time: i64, event_type: EventType, value: Option<f64>) {
        self.count += 1;
        *self.type_counts.entry(event_type).or_insert(0) += 1;

        self.first_event_time = Some(match self.first_event_time {
            Some(first) => first.min(event_time),
            None => event_time,
        });
        self.last_event_time = Some(match self.last_event_time {
            Some(last) => last.max(event_time),
            None => event_time,
        });

        if let Some(value) = value.filter(|v| v.is_finite()) {
            self.value_count += 1;
            self.sum_micros = self.sum_micros.saturating_add(to_micros(value));
            self.min = Some(self.min.map_or(value, |m| m.min(value)));
            self.max = Some(self.max.map_or(value, |m| m.max(value)));
        }
    }

    /// Merge another accumulator into this one
    pub fn merge(&mut self, other: &AggregateState) {
        self.count += other.count;
        self.value_count += other.value_count;
        self.sum_micros = self.sum_micros.saturating_add(other.sum_micros);

        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.first_event_time = match (self.first_event_time, other.first_event_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_event_time = match (self.last_event_time, other.last_event_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        for (event_type, count) in &other.type_counts {
            *self.type_counts.entry(*event_type).or_insert(0) += count;
        }
    }

    /// Sum of numeric values
    pub fn sum(&self) -> f64 {
        self.sum_micros as f64 / SUM_SCALE
    }

    /// Number of events of one type
    pub fn count_of(&self, event_type: EventType) -> u64 {
        self.type_counts.get(&event_type).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Span between first and last event time in milliseconds
    pub fn span_ms(&self) -> Option<i64> {
        match (self.first_event_time, self.last_event_time) {
            (Some(first), Some(last)) => Some(last - first),
            _ => None,
        }
    }

    /// Reset to the empty state
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Round a value to micro-units; out-of-range values saturate
fn to_micros(value: f64) -> i128 {
    (value * SUM_SCALE).round() as i128
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_from(events: &[(i64, EventType, Option<f64>)]) -> AggregateState {
        let mut state = AggregateState::new();
        for (time, event_type, value) in events {
            state.add(*time, *event_type, *value);
        }
        state
    }

    #[test]
    fn test_add_tracks_all_fields() {
        let state = state_from(&[
            (500, EventType::PageView, Some(120.0)),
            (100, EventType::PageView, Some(80.0)),
            (900, EventType::Conversion, None),
        ]);

        assert_eq!(state.count, 3);
        assert_eq!(state.value_count, 2);
        assert_eq!(state.sum(), 200.0);
        assert_eq!(state.min, Some(80.0));
        assert_eq!(state.max, Some(120.0));
        assert_eq!(state.first_event_time, Some(100));
        assert_eq!(state.last_event_time, Some(900));
        assert_eq!(state.count_of(EventType::PageView), 2);
        assert_eq!(state.count_of(EventType::SessionEnd), 0);
        assert_eq!(state.span_ms(), Some(800));
    }

    #[test]
    fn test_non_finite_values_are_ignored() {
        let state = state_from(&[(0, EventType::Conversion, Some(f64::NAN))]);
        assert_eq!(state.count, 1);
        assert_eq!(state.value_count, 0);
        assert_eq!(state.min, None);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let events = [
            (10, EventType::PageView, Some(1.0)),
            (30, EventType::Conversion, Some(4.0)),
            (20, EventType::SessionStart, None),
            (40, EventType::PageView, Some(2.0)),
        ];

        let whole = state_from(&events);

        let mut left = state_from(&events[2..]);
        left.merge(&state_from(&events[..2]));

        let mut right = state_from(&events[..1]);
        right.merge(&state_from(&events[1..]));

        assert_eq!(whole, left);
        assert_eq!(whole, right);
    }

    #[test]
    fn test_fractional_sum_is_order_independent() {
        let values = [0.1, 0.2, 0.3, 0.7, 1.05];
        let forward: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as i64, EventType::Conversion, Some(*v)))
            .collect();
        let mut backward = forward.clone();
        backward.reverse();
        let mut shuffled = forward.clone();
        shuffled.swap(0, 3);
        shuffled.swap(1, 4);

        let expected = state_from(&forward);
        assert_eq!(expected.sum(), 2.35);
        assert_eq!(state_from(&backward), expected);
        assert_eq!(state_from(&shuffled), expected);

        let mut merged = state_from(&forward[3..]);
        merged.merge(&state_from(&forward[..3]));
        assert_eq!(merged.sum(), expected.sum());
    }

    #[test]
    fn test_merge_with_empty() {
        let mut state = state_from(&[(10, EventType::PageView, Some(3.0))]);
        let before = state.clone();
        state.merge(&AggregateState::new());
        assert_eq!(state, before);

        let mut empty = AggregateState::new();
        empty.merge(&before);
        assert_eq!(empty, before);
    }

    #[test]
    fn test_reset() {
        let mut state = state_from(&[(10, EventType::PageView, None)]);
        assert!(!state.is_empty());
        state.reset();
        assert!(state.is_empty());
    }
}
