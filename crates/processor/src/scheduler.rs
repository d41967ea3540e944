//! Event-time firing of windows
//!
//! The [`FiringScheduler`] keeps one timer per live window: the fire time
//! while the window is OPEN and the purge time once it has FIRED. When the
//! watermark advances, due timers are popped in `(due time, window id)` order
//! and the window's trigger decides what happens:
//!
//! - OPEN and `watermark >= end`: fire with revision 0 and wait for purge
//! - FIRED and `watermark >= end + allowed_lateness`: purge the state
//!
//! Late-merge re-firings are driven per element through
//! [`FiringScheduler::on_element`]. Fired results carry a copy of the window
//! state, so the caller can evaluate them after the window is purged.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::aggregation::AggregateState;
use crate::state::KeyedStateStore;
use crate::window::{
    EventTimeTrigger, TriggerResult, WindowId, WindowLifecycle, WindowTrigger, WindowType,
};

/// A window emission
#[derive(Debug, Clone, PartialEq)]
pub struct FiredWindow {
    pub id: WindowId,
    pub window_type: WindowType,
    pub state: AggregateState,
    /// 0 for the first firing, incremented on every re-firing
    pub revision: u32,
}

/// Result of a watermark advance
#[derive(Debug, Default)]
pub struct AdvanceOutcome {
    /// Fired windows in firing order
    pub fired: Vec<FiredWindow>,
    /// Number of windows whose state was discarded
    pub purged: usize,
}

/// Watermark-driven window timers
#[derive(Debug)]
pub struct FiringScheduler {
    triggers: HashMap<String, Arc<dyn WindowTrigger>>,
    default_trigger: Arc<dyn WindowTrigger>,
    timers: BTreeSet<(i64, WindowId)>,
    due: HashMap<WindowId, i64>,
}

impl Default for FiringScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FiringScheduler {
    pub fn new() -> Self {
        Self {
            triggers: HashMap::new(),
            default_trigger: Arc::new(EventTimeTrigger::new(0)),
            timers: BTreeSet::new(),
            due: HashMap::new(),
        }
    }

    /// Trigger used for the windows of one metric definition
    pub fn set_trigger(&mut self, metric: impl Into<String>, trigger: Arc<dyn WindowTrigger>) {
        self.triggers.insert(metric.into(), trigger);
    }

    fn trigger(&self, metric: &str) -> Arc<dyn WindowTrigger> {
        self.triggers
            .get(metric)
            .cloned()
            .unwrap_or_else(|| self.default_trigger.clone())
    }

    /// Register or move the timer of a window
    pub fn schedule(&mut self, id: &WindowId, lifecycle: WindowLifecycle) {
        let trigger = self.trigger(&id.metric);
        let bounds = id.bounds();
        let due = match lifecycle {
            WindowLifecycle::Open => trigger.fire_time(&bounds),
            WindowLifecycle::Fired { .. } => trigger.purge_time(&bounds),
            WindowLifecycle::Purged => {
                self.unregister(id);
                return;
            }
        };

        if let Some(previous) = self.due.insert(id.clone(), due) {
            if previous == due {
                return;
            }
            self.timers.remove(&(previous, id.clone()));
        }
        self.timers.insert((due, id.clone()));
    }

    /// Drop the timer of a window
    pub fn unregister(&mut self, id: &WindowId) {
        if let Some(due) = self.due.remove(id) {
            self.timers.remove(&(due, id.clone()));
        }
    }

    /// Apply the trigger after an element was added to a window
    ///
    /// Returns the emission if the window fires right away: either because
    /// it was created behind the watermark, or as a late-merge re-firing.
    pub fn on_element(
        &mut self,
        id: &WindowId,
        store: &mut KeyedStateStore,
        watermark: i64,
    ) -> Option<FiredWindow> {
        let entry = store.entry(id)?;
        let lifecycle = entry.lifecycle;
        let result = self
            .trigger(&id.metric)
            .on_element(&id.bounds(), lifecycle, watermark);

        match result {
            TriggerResult::Continue => {
                self.schedule(id, lifecycle);
                None
            }
            TriggerResult::Fire => {
                let fired = fire(id, store)?;
                trace!(window = %id, revision = fired.revision, "Window fired on element");
                self.schedule(id, WindowLifecycle::Fired { revision: fired.revision });
                Some(fired)
            }
            TriggerResult::FireAndPurge => {
                let fired = fire(id, store)?;
                store.remove(id);
                self.unregister(id);
                Some(fired)
            }
            TriggerResult::Purge => {
                store.remove(id);
                self.unregister(id);
                None
            }
        }
    }

    /// Fire and purge every window whose timer is due at `watermark`
    pub fn advance(&mut self, watermark: i64, store: &mut KeyedStateStore) -> AdvanceOutcome {
        let mut outcome = AdvanceOutcome::default();

        while let Some((due, _)) = self.timers.first() {
            if *due > watermark {
                break;
            }
            let Some((_, id)) = self.timers.pop_first() else {
                break;
            };
            self.due.remove(&id);

            let Some(entry) = store.entry(&id) else {
                continue;
            };
            let lifecycle = entry.lifecycle;
            let result = self
                .trigger(&id.metric)
                .on_watermark(&id.bounds(), lifecycle, watermark);

            match result {
                TriggerResult::Fire => {
                    if let Some(fired) = fire(&id, store) {
                        self.schedule(&id, WindowLifecycle::Fired { revision: fired.revision });
                        outcome.fired.push(fired);
                    }
                }
                TriggerResult::FireAndPurge => {
                    if let Some(fired) = fire(&id, store) {
                        outcome.fired.push(fired);
                    }
                    store.remove(&id);
                    outcome.purged += 1;
                }
                TriggerResult::Purge => {
                    store.remove(&id);
                    outcome.purged += 1;
                }
                TriggerResult::Continue => {
                    debug!(window = %id, lifecycle = %lifecycle, "Due timer did not trigger");
                }
            }
        }

        if !outcome.fired.is_empty() || outcome.purged > 0 {
            debug!(
                watermark = watermark,
                fired = outcome.fired.len(),
                purged = outcome.purged,
                "Watermark advance processed"
            );
        }

        outcome
    }

    /// Recreate all timers from restored state
    pub fn rebuild(&mut self, store: &KeyedStateStore) {
        self.timers.clear();
        self.due.clear();
        for (id, entry) in store.iter() {
            self.schedule(id, entry.lifecycle);
        }
    }

    /// Number of registered timers
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Earliest due time
    pub fn next_due(&self) -> Option<i64> {
        self.timers.first().map(|(due, _)| *due)
    }
}

fn fire(id: &WindowId, store: &mut KeyedStateStore) -> Option<FiredWindow> {
    let revision = store.mark_fired(id)?;
    let entry = store.entry(id)?;
    Some(FiredWindow {
        id: id.clone(),
        window_type: entry.window_type,
        state: entry.state.clone(),
        revision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowBounds;
    use analytics_types::EventType;

    fn setup(lateness: i64) -> (FiringScheduler, KeyedStateStore) {
        let mut scheduler = FiringScheduler::new();
        scheduler.set_trigger("m", Arc::new(EventTimeTrigger::new(lateness)));
        (scheduler, KeyedStateStore::new())
    }

    fn add(
        scheduler: &mut FiringScheduler,
        store: &mut KeyedStateStore,
        start: i64,
        t: i64,
        watermark: i64,
    ) -> (WindowId, Option<FiredWindow>) {
        let id = WindowId::new("m", "k", WindowBounds::new(start, start + 10).unwrap());
        store.upsert(&id, WindowType::Tumbling, t, EventType::PageView, None);
        let fired = scheduler.on_element(&id, store, watermark);
        (id, fired)
    }

    #[test]
    fn test_fires_at_end_then_purges_after_lateness() {
        let (mut scheduler, mut store) = setup(5);
        let (id, fired) = add(&mut scheduler, &mut store, 0, 3, i64::MIN);
        assert!(fired.is_none());
        assert_eq!(scheduler.next_due(), Some(10));

        assert!(scheduler.advance(9, &mut store).fired.is_empty());

        let outcome = scheduler.advance(10, &mut store);
        assert_eq!(outcome.fired.len(), 1);
        assert_eq!(outcome.fired[0].revision, 0);
        assert_eq!(outcome.fired[0].state.count, 1);
        assert!(store.contains(&id));
        assert_eq!(scheduler.next_due(), Some(15));

        let outcome = scheduler.advance(15, &mut store);
        assert!(outcome.fired.is_empty());
        assert_eq!(outcome.purged, 1);
        assert!(!store.contains(&id));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_zero_lateness_fires_and_purges_together() {
        let (mut scheduler, mut store) = setup(0);
        let (id, _) = add(&mut scheduler, &mut store, 0, 3, i64::MIN);

        let outcome = scheduler.advance(100, &mut store);
        assert_eq!(outcome.fired.len(), 1);
        assert_eq!(outcome.purged, 1);
        assert!(!store.contains(&id));
    }

    #[test]
    fn test_late_element_refires_with_next_revision() {
        let (mut scheduler, mut store) = setup(20);
        add(&mut scheduler, &mut store, 0, 3, i64::MIN);
        scheduler.advance(12, &mut store);

        let (_, fired) = add(&mut scheduler, &mut store, 0, 5, 12);
        let fired = fired.unwrap();
        assert_eq!(fired.revision, 1);
        assert_eq!(fired.state.count, 2);

        let (_, fired) = add(&mut scheduler, &mut store, 0, 7, 12);
        assert_eq!(fired.unwrap().revision, 2);

        // Purge timer is unchanged by re-firings
        assert_eq!(scheduler.next_due(), Some(30));
    }

    #[test]
    fn test_window_created_behind_watermark_fires_immediately() {
        let (mut scheduler, mut store) = setup(20);
        let (_, fired) = add(&mut scheduler, &mut store, 0, 5, 12);

        let fired = fired.unwrap();
        assert_eq!(fired.revision, 0);
        assert_eq!(scheduler.next_due(), Some(30));
    }

    #[test]
    fn test_fire_order_is_deterministic() {
        let (mut scheduler, mut store) = setup(0);
        for start in [20, 0, 10] {
            add(&mut scheduler, &mut store, start, start + 1, i64::MIN);
        }

        let outcome = scheduler.advance(100, &mut store);
        let starts: Vec<i64> = outcome.fired.iter().map(|f| f.id.start).collect();
        assert_eq!(starts, vec![0, 10, 20]);
    }

    #[test]
    fn test_unregister_and_rebuild() {
        let (mut scheduler, mut store) = setup(5);
        let (id, _) = add(&mut scheduler, &mut store, 0, 3, i64::MIN);
        scheduler.unregister(&id);
        assert_eq!(scheduler.pending(), 0);

        scheduler.rebuild(&store);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.next_due(), Some(10));
    }
}
