use analytics_types::{AnalyticsEvent, EventType};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::AggregateState;
use crate::window::WindowBounds;

/// Numeric event field an aggregate can read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueField {
    /// `conversionData.value`
    ConversionValue,
    /// `pageViewData.pageLoadTime` in milliseconds
    PageLoadTime,
}

impl ValueField {
    pub fn extract(&self, event: &AnalyticsEvent) -> Option<f64> {
        match self {
            ValueField::ConversionValue => event.conversion_value(),
            ValueField::PageLoadTime => event.page_load_time(),
        }
    }
}

/// Final value of a fired window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateResult {
    pub value: f64,
    pub count: u64,
}

/// How a window's [`AggregateState`] turns into a metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum AggregateFunction {
    /// Number of events
    Count,
    /// Number of events divided by the window length in seconds
    RatePerSecond,
    Sum { field: ValueField },
    Average { field: ValueField },
    Min { field: ValueField },
    Max { field: ValueField },
    /// Seconds between the first and the last event of the window
    SessionDuration,
    /// Count of `numerator` events divided by count of `denominator` events
    /// in the same window
    Ratio {
        numerator: EventType,
        denominator: EventType,
    },
}

impl AggregateFunction {
    /// Field whose value is fed into the accumulator, if any
    pub fn value_field(&self) -> Option<ValueField> {
        match self {
            AggregateFunction::Sum { field }
            | AggregateFunction::Average { field }
            | AggregateFunction::Min { field }
            | AggregateFunction::Max { field } => Some(*field),
            _ => None,
        }
    }

    /// Numeric value to accumulate for `event`
    pub fn extract(&self, event: &AnalyticsEvent) -> Option<f64> {
        self.value_field().and_then(|field| field.extract(event))
    }

    /// Evaluate the window state
    ///
    /// Returns `None` when the window has no meaningful value, e.g. a ratio
    /// whose denominator is zero or a minimum over no values. No metric
    /// record is emitted in that case.
    pub fn evaluate(&self, state: &AggregateState, bounds: &WindowBounds) -> Option<AggregateResult> {
        match self {
            AggregateFunction::Count => Some(AggregateResult {
                value: state.count as f64,
                count: state.count,
            }),
            AggregateFunction::RatePerSecond => {
                let seconds = bounds.duration_ms() as f64 / 1000.0;
                Some(AggregateResult {
                    value: state.count as f64 / seconds,
                    count: state.count,
                })
            }
            AggregateFunction::Sum { .. } => Some(AggregateResult {
                value: state.sum(),
                count: state.value_count,
            }),
            AggregateFunction::Average { .. } => {
                if state.value_count == 0 {
                    return None;
                }
                Some(AggregateResult {
                    value: state.sum() / state.value_count as f64,
                    count: state.value_count,
                })
            }
            AggregateFunction::Min { .. } => state.min.map(|value| AggregateResult {
                value,
                count: state.value_count,
            }),
            AggregateFunction::Max { .. } => state.max.map(|value| AggregateResult {
                value,
                count: state.value_count,
            }),
            AggregateFunction::SessionDuration => state.span_ms().map(|span| AggregateResult {
                value: span as f64 / 1000.0,
                count: 1,
            }),
            AggregateFunction::Ratio {
                numerator,
                denominator,
            } => {
                let denominator_count = state.count_of(*denominator);
                if denominator_count == 0 {
                    return None;
                }
                let numerator_count = state.count_of(*numerator);
                Some(AggregateResult {
                    value: numerator_count as f64 / denominator_count as f64,
                    count: numerator_count,
                })
            }
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "count"),
            AggregateFunction::RatePerSecond => write!(f, "rate_per_second"),
            AggregateFunction::Sum { field } => write!(f, "sum({:?})", field),
            AggregateFunction::Average { field } => write!(f, "average({:?})", field),
            AggregateFunction::Min { field } => write!(f, "min({:?})", field),
            AggregateFunction::Max { field } => write!(f, "max({:?})", field),
            AggregateFunction::SessionDuration => write!(f, "session_duration"),
            AggregateFunction::Ratio {
                numerator,
                denominator,
            } => write!(f, "ratio({}/{})", numerator, denominator),
        }
    }
}
