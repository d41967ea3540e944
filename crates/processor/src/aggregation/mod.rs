//! Aggregation module for computing metrics over windows
//!
//! Each window instance owns one [`AggregateState`], an incremental
//! accumulator supporting:
//!
//! - **Incremental updates**: feed events one at a time
//! - **Accumulator merging**: combine session windows and partial results
//! - **State serialization**: persist and restore through checkpoints
//!
//! When a window fires, its [`AggregateFunction`] turns the accumulator into a
//! metric value.
//!
//! # Examples
//!
//! ```rust
//! use analytics_types::EventType;
//! use processor::aggregation::{AggregateFunction, AggregateState};
//! use processor::window::WindowBounds;
//!
//! let mut state = AggregateState::new();
//! state.add(1_000, EventType::PageView, None);
//! state.add(2_000, EventType::PageView, None);
//! state.add(3_000, EventType::Conversion, None);
//!
//! let bounds = WindowBounds::new(0, 60_000).unwrap();
//! let rate = AggregateFunction::Ratio {
//!     numerator: EventType::Conversion,
//!     denominator: EventType::PageView,
//! };
//! assert_eq!(rate.evaluate(&state, &bounds).unwrap().value, 0.5);
//! ```

mod function;
mod state;

pub use function::{AggregateFunction, AggregateResult, ValueField};
pub use state::AggregateState;
