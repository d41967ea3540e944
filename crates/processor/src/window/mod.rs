//! Windowing module for stream processing
//!
//! This module provides windowing functionality for event-time aggregations.
//! It supports three kinds of windows:
//!
//! # Window Types
//!
//! ## Tumbling Windows
//! Fixed-size, non-overlapping windows. Each event belongs to exactly one window.
//!
//! ```text
//! Time:     0----5----10---15---20---25---30
//! Windows:  [----][----][----][----][----]
//! ```
//!
//! ## Sliding Windows
//! Fixed-size, overlapping windows. Events can belong to multiple windows.
//!
//! ```text
//! Time:     0----5----10---15---20---25---30
//! Windows:  [----------]
//!                [----------]
//!                     [----------]
//! ```
//!
//! ## Session Windows
//! Variable-size windows based on inactivity gaps. Each event opens a
//! proto-window `[t, t + gap)` which is merged with every overlapping session
//! of the same key.
//!
//! ```text
//! Time:     0-2--5----------12-14----20
//! Sessions: [----]           [---]   [-]
//! Gap:           ^^^^^^^^^^^^     ^^^^
//! ```
//!
//! # Window Triggers
//!
//! [`EventTimeTrigger`] fires a window when the watermark reaches its end and
//! purges it once the watermark passes `end + allowed_lateness`.
//!
//! # Example Usage
//!
//! ```rust
//! use processor::window::{
//!     SessionWindowAssigner, SlidingWindowAssigner, TumblingWindowAssigner, WindowAssigner,
//! };
//!
//! // Tumbling window: 5-second non-overlapping windows
//! let tumbling = TumblingWindowAssigner::new(5_000).unwrap();
//! assert_eq!(tumbling.assign_windows(7_000)[0].start, 5_000);
//!
//! // Sliding window: 60-second windows, sliding every 10 seconds
//! let sliding = SlidingWindowAssigner::new(60_000, 10_000).unwrap();
//! assert_eq!(sliding.assign_windows(65_000).len(), 6);
//!
//! // Session window: 30-minute inactivity gap
//! let session = SessionWindowAssigner::new(30 * 60_000).unwrap();
//! assert!(session.is_session_window());
//! ```
//!
//! # Window Merging
//!
//! ```text
//! gap = 5
//! Initial state:    Session A [0, 5)    Session B [10, 15)
//! Event at t=3:     Session A [0, 8)    (extended)
//! Event at t=7:     Session A [0, 15)   (proto [7, 12) bridges A and B)
//! ```

pub mod assigner;
pub mod trigger;
pub mod types;

pub use assigner::{
    SessionWindowAssigner, SlidingWindowAssigner, TumblingWindowAssigner, WindowAssigner,
};
pub use trigger::{EventTimeTrigger, TriggerResult, WindowLifecycle, WindowTrigger};
pub use types::{WindowBounds, WindowId, WindowType};

/// Outcome of merging a session proto-window into the existing sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMerge {
    /// Bounds of the resulting session
    pub merged: WindowBounds,
    /// Existing sessions that were absorbed into `merged`
    pub absorbed: Vec<WindowBounds>,
}

impl SessionMerge {
    /// Whether the proto-window started a brand-new session
    pub fn is_new(&self) -> bool {
        self.absorbed.is_empty()
    }
}

/// Window merger for session windows
///
/// Merging is transitive: a proto-window bridging two sessions collapses all
/// three into one.
#[derive(Debug, Clone, Copy)]
pub struct WindowMerger;

impl WindowMerger {
    /// Merge `proto` with every overlapping window in `existing`
    pub fn merge<I>(proto: WindowBounds, existing: I) -> SessionMerge
    where
        I: IntoIterator<Item = WindowBounds>,
    {
        let mut candidates: Vec<WindowBounds> = existing.into_iter().collect();
        candidates.sort();

        let mut merged = proto;
        let mut absorbed = Vec::new();

        // Repeat until stable, since growing `merged` can reach earlier candidates
        loop {
            let before = absorbed.len();
            candidates.retain(|candidate| {
                if merged.overlaps(candidate) {
                    merged = merged.merge(candidate);
                    absorbed.push(*candidate);
                    false
                } else {
                    true
                }
            });
            if absorbed.len() == before {
                break;
            }
        }

        absorbed.sort();
        SessionMerge { merged, absorbed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(start: i64, end: i64) -> WindowBounds {
        WindowBounds::new(start, end).unwrap()
    }

    #[test]
    fn test_window_merger_no_overlap() {
        let result = WindowMerger::merge(bounds(3000, 4000), vec![bounds(0, 1000)]);
        assert_eq!(result.merged, bounds(3000, 4000));
        assert!(result.is_new());
    }

    #[test]
    fn test_window_merger_with_overlap() {
        let result = WindowMerger::merge(bounds(500, 1500), vec![bounds(0, 1000)]);
        assert_eq!(result.merged, bounds(0, 1500));
        assert_eq!(result.absorbed, vec![bounds(0, 1000)]);
    }

    #[test]
    fn test_window_merger_adjacent_windows_stay_separate() {
        let result = WindowMerger::merge(bounds(1000, 2000), vec![bounds(0, 1000)]);
        assert!(result.is_new());
    }

    #[test]
    fn test_window_merger_bridges_sessions() {
        let existing = vec![bounds(0, 1000), bounds(1500, 2500), bounds(5000, 6000)];
        let result = WindowMerger::merge(bounds(900, 1600), existing);

        assert_eq!(result.merged, bounds(0, 2500));
        assert_eq!(result.absorbed, vec![bounds(0, 1000), bounds(1500, 2500)]);
    }

    #[test]
    fn test_session_window_complete_flow() {
        let assigner = SessionWindowAssigner::new(30_000).unwrap();

        let first = assigner.assign_windows(0)[0];
        let second = assigner.assign_windows(20_000)[0];
        let result = WindowMerger::merge(second, vec![first]);
        assert_eq!(result.merged, bounds(0, 50_000));

        let third = assigner.assign_windows(51_000)[0];
        let result = WindowMerger::merge(third, vec![result.merged]);
        assert!(result.is_new());
        assert_eq!(result.merged, bounds(51_000, 81_000));
    }

    #[test]
    fn test_tumbling_window_complete_flow() {
        let assigner = TumblingWindowAssigner::new(1000).unwrap();
        let trigger = EventTimeTrigger::new(0);

        let windows = assigner.assign_windows(500);
        assert_eq!(windows, vec![bounds(0, 1000)]);

        assert_eq!(
            trigger.on_watermark(&windows[0], WindowLifecycle::Open, 900),
            TriggerResult::Continue
        );
        assert_eq!(
            trigger.on_watermark(&windows[0], WindowLifecycle::Open, 1000),
            TriggerResult::FireAndPurge
        );
    }
}
