//! Window triggers
//!
//! This module determines when a window should be evaluated and when its
//! state may be discarded. Windows move through a small lifecycle:
//!
//! ```text
//! OPEN --(watermark >= end)--> FIRED --(watermark >= end + lateness)--> PURGED
//!                                ^  |
//!                                +--+ late element within lateness (re-fire)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::WindowBounds;

/// Lifecycle state of a window instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowLifecycle {
    /// Accumulating, not yet emitted
    Open,
    /// Emitted at least once; `revision` counts re-firings
    Fired { revision: u32 },
    /// State discarded; never re-created
    Purged,
}

impl WindowLifecycle {
    pub fn is_fired(&self) -> bool {
        matches!(self, WindowLifecycle::Fired { .. })
    }

    /// Revision the next firing will carry
    pub fn next_revision(&self) -> u32 {
        match self {
            WindowLifecycle::Open => 0,
            WindowLifecycle::Fired { revision } => revision + 1,
            WindowLifecycle::Purged => 0,
        }
    }
}

impl fmt::Display for WindowLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowLifecycle::Open => write!(f, "OPEN"),
            WindowLifecycle::Fired { revision } => write!(f, "FIRED(rev {})", revision),
            WindowLifecycle::Purged => write!(f, "PURGED"),
        }
    }
}

/// Result of trigger evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    /// Continue processing, don't fire
    Continue,
    /// Fire the window and emit results
    Fire,
    /// Fire the window and purge all state
    FireAndPurge,
    /// Purge the window without firing
    Purge,
}

/// Trait for window triggers
pub trait WindowTrigger: Send + Sync + fmt::Debug {
    /// Evaluate when an element has been added to the window
    fn on_element(
        &self,
        bounds: &WindowBounds,
        lifecycle: WindowLifecycle,
        watermark: i64,
    ) -> TriggerResult;

    /// Evaluate when the watermark advances
    fn on_watermark(
        &self,
        bounds: &WindowBounds,
        lifecycle: WindowLifecycle,
        watermark: i64,
    ) -> TriggerResult;

    /// Event time at which the window first fires
    fn fire_time(&self, bounds: &WindowBounds) -> i64 {
        bounds.end
    }

    /// Event time at which the window state is discarded
    fn purge_time(&self, bounds: &WindowBounds) -> i64;
}

/// Trigger that fires when the watermark passes the end of the window
///
/// This is the standard trigger for event-time windows. The window stays
/// around for `allowed_lateness` after firing; elements arriving in that
/// period re-fire it with an incremented revision.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventTimeTrigger {
    allowed_lateness: i64,
}

impl EventTimeTrigger {
    pub fn new(allowed_lateness_ms: i64) -> Self {
        Self {
            allowed_lateness: allowed_lateness_ms.max(0),
        }
    }

    pub fn allowed_lateness_ms(&self) -> i64 {
        self.allowed_lateness
    }
}

impl WindowTrigger for EventTimeTrigger {
    fn on_element(
        &self,
        bounds: &WindowBounds,
        lifecycle: WindowLifecycle,
        watermark: i64,
    ) -> TriggerResult {
        match lifecycle {
            WindowLifecycle::Open if watermark >= self.fire_time(bounds) => {
                if watermark >= self.purge_time(bounds) {
                    TriggerResult::FireAndPurge
                } else {
                    TriggerResult::Fire
                }
            }
            WindowLifecycle::Fired { .. } => TriggerResult::Fire,
            _ => TriggerResult::Continue,
        }
    }

    fn on_watermark(
        &self,
        bounds: &WindowBounds,
        lifecycle: WindowLifecycle,
        watermark: i64,
    ) -> TriggerResult {
        let purge = watermark >= self.purge_time(bounds);
        match lifecycle {
            WindowLifecycle::Open if watermark >= self.fire_time(bounds) => {
                if purge {
                    TriggerResult::FireAndPurge
                } else {
                    TriggerResult::Fire
                }
            }
            WindowLifecycle::Fired { .. } if purge => TriggerResult::Purge,
            _ => TriggerResult::Continue,
        }
    }

    fn purge_time(&self, bounds: &WindowBounds) -> i64 {
        bounds.end.saturating_add(self.allowed_lateness)
    }
}
