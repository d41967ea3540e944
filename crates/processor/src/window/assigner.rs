//! Window assigners
//!
//! This module provides different strategies for assigning events to windows
//! based on their timestamps.

use super::types::{WindowBounds, WindowType};
use crate::error::{WindowError, WindowResult};
use std::fmt;

/// Start of the `size`-aligned slot containing `timestamp`, shifted by `offset`
///
/// Floors towards negative infinity so pre-epoch timestamps align too, and
/// saturates at the ends of the `i64` range instead of overflowing.
pub fn align_down(timestamp: i64, size: i64, offset: i64) -> i64 {
    timestamp
        .saturating_sub(offset)
        .div_euclid(size)
        .saturating_mul(size)
        .saturating_add(offset)
}

/// Trait for assigning events to windows
pub trait WindowAssigner: Send + Sync + fmt::Debug {
    /// Assign a timestamp to one or more windows, in ascending start order
    fn assign_windows(&self, timestamp: i64) -> Vec<WindowBounds>;

    /// Kind of window this assigner produces
    fn window_type(&self) -> WindowType;

    /// Get the maximum number of windows an event can be assigned to
    fn max_windows_per_event(&self) -> usize {
        1
    }

    /// Check if this is a session window assigner (requires merging)
    fn is_session_window(&self) -> bool {
        false
    }
}

/// Tumbling window assigner
///
/// Creates fixed-size, non-overlapping windows. Each event is assigned to
/// exactly one window based on its timestamp.
///
/// # Example
/// ```text
/// Window size: 5 seconds
/// Event at timestamp 7 -> Window [5, 10)
/// Event at timestamp 12 -> Window [10, 15)
/// ```
#[derive(Debug, Clone)]
pub struct TumblingWindowAssigner {
    /// Size of each window in milliseconds
    size: i64,
    /// Offset for window alignment in milliseconds
    offset: i64,
}

impl TumblingWindowAssigner {
    /// Create a new tumbling window assigner
    pub fn new(size_ms: i64) -> WindowResult<Self> {
        if size_ms <= 0 {
            return Err(WindowError::InvalidWindowSize { size: size_ms });
        }
        Ok(Self {
            size: size_ms,
            offset: 0,
        })
    }

    /// Create a tumbling window assigner with an offset
    pub fn with_offset(mut self, offset_ms: i64) -> Self {
        self.offset = offset_ms.rem_euclid(self.size);
        self
    }

    pub fn size_ms(&self) -> i64 {
        self.size
    }

    /// Calculate the window start for a given timestamp
    fn window_start(&self, timestamp: i64) -> i64 {
        align_down(timestamp, self.size, self.offset)
    }
}

impl WindowAssigner for TumblingWindowAssigner {
    fn assign_windows(&self, timestamp: i64) -> Vec<WindowBounds> {
        vec![WindowBounds::with_size(self.window_start(timestamp), self.size)]
    }

    fn window_type(&self) -> WindowType {
        WindowType::Tumbling
    }
}

/// Sliding window assigner
///
/// Creates fixed-size, overlapping windows. Each event is assigned to up to
/// `ceil(size / slide)` windows.
///
/// # Example
/// ```text
/// Window size: 10 seconds, Slide: 5 seconds
/// Event at timestamp 7 -> Windows [0, 10), [5, 15)
/// Event at timestamp 12 -> Windows [5, 15), [10, 20)
/// ```
#[derive(Debug, Clone)]
pub struct SlidingWindowAssigner {
    /// Size of each window in milliseconds
    size: i64,
    /// Slide interval between windows in milliseconds
    slide: i64,
    /// Offset for window alignment in milliseconds
    offset: i64,
}

impl SlidingWindowAssigner {
    /// Create a new sliding window assigner
    pub fn new(size_ms: i64, slide_ms: i64) -> WindowResult<Self> {
        if size_ms <= 0 {
            return Err(WindowError::InvalidWindowSize { size: size_ms });
        }
        if slide_ms <= 0 || slide_ms > size_ms {
            return Err(WindowError::InvalidSlideSize {
                slide: slide_ms,
                window: size_ms,
            });
        }

        Ok(Self {
            size: size_ms,
            slide: slide_ms,
            offset: 0,
        })
    }

    /// Create a sliding window assigner with an offset
    pub fn with_offset(mut self, offset_ms: i64) -> Self {
        self.offset = offset_ms.rem_euclid(self.slide);
        self
    }

    pub fn size_ms(&self) -> i64 {
        self.size
    }

    pub fn slide_ms(&self) -> i64 {
        self.slide
    }
}

impl WindowAssigner for SlidingWindowAssigner {
    fn assign_windows(&self, timestamp: i64) -> Vec<WindowBounds> {
        // Latest window containing the timestamp, then walk back one slide at a time
        let last_start = align_down(timestamp, self.slide, self.offset);
        let earliest_excluded = timestamp.saturating_sub(self.size);

        let mut windows = Vec::with_capacity(self.max_windows_per_event());
        let mut start = last_start;
        while start > earliest_excluded && windows.len() < self.max_windows_per_event() {
            windows.push(WindowBounds::with_size(start, self.size));
            start = start.saturating_sub(self.slide);
        }

        windows.reverse();
        windows
    }

    fn window_type(&self) -> WindowType {
        WindowType::Sliding
    }

    fn max_windows_per_event(&self) -> usize {
        ((self.size - 1) / self.slide + 1) as usize
    }
}

/// Session window assigner
///
/// Assigns each event a proto-window `[t, t + gap)`. Proto-windows that
/// overlap existing sessions of the same key are merged by
/// [`super::WindowMerger`].
#[derive(Debug, Clone)]
pub struct SessionWindowAssigner {
    /// Inactivity gap in milliseconds
    gap: i64,
}

impl SessionWindowAssigner {
    /// Create a new session window assigner
    pub fn new(gap_ms: i64) -> WindowResult<Self> {
        if gap_ms <= 0 {
            return Err(WindowError::InvalidGapSize { gap: gap_ms });
        }
        Ok(Self { gap: gap_ms })
    }

    pub fn gap_ms(&self) -> i64 {
        self.gap
    }
}

impl WindowAssigner for SessionWindowAssigner {
    fn assign_windows(&self, timestamp: i64) -> Vec<WindowBounds> {
        vec![WindowBounds::with_size(timestamp, self.gap)]
    }

    fn window_type(&self) -> WindowType {
        WindowType::Session
    }

    fn is_session_window(&self) -> bool {
        true
    }
}
