//! Keyed window state
//!
//! [`KeyedStateStore`] owns exactly one entry per window instance. It is owned
//! by a single engine (one worker, one key range), so entries are never
//! mutated concurrently. Snapshots serialize the ordered map in one pass;
//! the engine persists the resulting blob asynchronously so event intake only
//! pauses for the copy.

use analytics_types::EventType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::aggregation::AggregateState;
use crate::error::{StateError, StateResult};
use crate::window::{WindowId, WindowLifecycle, WindowType};

/// State and lifecycle of one window instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub window_type: WindowType,
    pub state: AggregateState,
    pub lifecycle: WindowLifecycle,
}

impl WindowEntry {
    pub fn new(window_type: WindowType) -> Self {
        Self {
            window_type,
            state: AggregateState::new(),
            lifecycle: WindowLifecycle::Open,
        }
    }
}

/// Result of adding an event to a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upsert {
    /// The window did not exist before this event
    pub created: bool,
    /// Lifecycle after the update
    pub lifecycle: WindowLifecycle,
}

/// Window state keyed by [`WindowId`]
#[derive(Debug, Default, Clone)]
pub struct KeyedStateStore {
    entries: BTreeMap<WindowId, WindowEntry>,
}

impl KeyedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated state of a window, if it exists
    pub fn get(&self, id: &WindowId) -> Option<&AggregateState> {
        self.entries.get(id).map(|entry| &entry.state)
    }

    pub fn entry(&self, id: &WindowId) -> Option<&WindowEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &WindowId) -> bool {
        self.entries.contains_key(id)
    }

    /// Add an event to a window, creating the window on first use
    pub fn upsert(
        &mut self,
        id: &WindowId,
        window_type: WindowType,
        event_time: i64,
        event_type: EventType,
        value: Option<f64>,
    ) -> Upsert {
        let mut created = false;
        let entry = self.entries.entry(id.clone()).or_insert_with(|| {
            created = true;
            WindowEntry::new(window_type)
        });
        entry.state.add(event_time, event_type, value);

        Upsert {
            created,
            lifecycle: entry.lifecycle,
        }
    }

    /// Insert or replace a whole entry (used for merged sessions)
    pub fn insert_entry(&mut self, id: WindowId, entry: WindowEntry) {
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: &WindowId) -> Option<WindowEntry> {
        self.entries.remove(id)
    }

    /// All windows of one metric definition and key, in start order
    pub fn windows_for_key<'a>(
        &'a self,
        metric: &'a str,
        key: &'a str,
    ) -> impl Iterator<Item = (&'a WindowId, &'a WindowEntry)> + 'a {
        self.entries
            .range(WindowId::lower_bound(metric, key)..)
            .take_while(move |(id, _)| id.belongs_to(metric, key))
    }

    /// Move a window to FIRED and return the revision of this firing
    pub fn mark_fired(&mut self, id: &WindowId) -> Option<u32> {
        let entry = self.entries.get_mut(id)?;
        let revision = entry.lifecycle.next_revision();
        entry.lifecycle = WindowLifecycle::Fired { revision };
        Some(revision)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WindowId, &WindowEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live windows per key, across definitions
    pub fn active_windows_per_key(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for id in self.entries.keys() {
            *counts.entry(id.key.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Serialize the whole store
    pub fn snapshot(&self) -> StateResult<Vec<u8>> {
        bincode::serialize(&self.entries).map_err(|e| StateError::SerializationFailed {
            key: "keyed_state".to_string(),
            reason: e.to_string(),
        })
    }

    /// Replace the store contents with a snapshot
    pub fn restore(&mut self, blob: &[u8]) -> StateResult<()> {
        let entries: BTreeMap<WindowId, WindowEntry> =
            bincode::deserialize(blob).map_err(|e| StateError::DeserializationFailed {
                key: "keyed_state".to_string(),
                reason: e.to_string(),
            })?;

        debug!(windows = entries.len(), "Restored keyed window state");
        self.entries = entries;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowBounds;

    fn id(metric: &str, key: &str, start: i64, end: i64) -> WindowId {
        WindowId::new(metric, key, WindowBounds::new(start, end).unwrap())
    }

    #[test]
    fn test_upsert_creates_then_accumulates() {
        let mut store = KeyedStateStore::new();
        let window = id("m", "u1", 0, 5000);

        let first = store.upsert(&window, WindowType::Tumbling, 100, EventType::PageView, None);
        assert!(first.created);
        assert_eq!(first.lifecycle, WindowLifecycle::Open);

        let second = store.upsert(&window, WindowType::Tumbling, 200, EventType::PageView, None);
        assert!(!second.created);

        assert_eq!(store.get(&window).unwrap().count, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_windows_for_key_is_scoped() {
        let mut store = KeyedStateStore::new();
        for (metric, key, start) in [("a", "u1", 0), ("a", "u1", 10), ("a", "u2", 0), ("b", "u1", 0)] {
            store.upsert(
                &id(metric, key, start, start + 10),
                WindowType::Session,
                start,
                EventType::PageView,
                None,
            );
        }

        let starts: Vec<i64> = store.windows_for_key("a", "u1").map(|(id, _)| id.start).collect();
        assert_eq!(starts, vec![0, 10]);
        assert_eq!(store.windows_for_key("a", "u3").count(), 0);

        let per_key = store.active_windows_per_key();
        assert_eq!(per_key.get("u1"), Some(&3));
        assert_eq!(per_key.get("u2"), Some(&1));
    }

    #[test]
    fn test_mark_fired_increments_revision() {
        let mut store = KeyedStateStore::new();
        let window = id("m", "k", 0, 10);
        store.upsert(&window, WindowType::Tumbling, 1, EventType::PageView, None);

        assert_eq!(store.mark_fired(&window), Some(0));
        assert_eq!(store.mark_fired(&window), Some(1));
        assert_eq!(
            store.entry(&window).unwrap().lifecycle,
            WindowLifecycle::Fired { revision: 1 }
        );
        assert_eq!(store.mark_fired(&id("m", "k", 10, 20)), None);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut store = KeyedStateStore::new();
        let window = id("m", "k", 0, 10);
        store.upsert(&window, WindowType::Sliding, 5, EventType::Conversion, Some(9.5));
        store.mark_fired(&window);

        let blob = store.snapshot().unwrap();
        let mut restored = KeyedStateStore::new();
        restored.restore(&blob).unwrap();

        assert_eq!(restored.entry(&window), store.entry(&window));
        assert_eq!(restored.len(), 1);
    }

    #[test]
    fn test_restore_rejects_garbage() {
        let mut store = KeyedStateStore::new();
        assert!(matches!(
            store.restore(&[0xff; 3]),
            Err(StateError::DeserializationFailed { .. })
        ));
    }

    #[test]
    fn test_remove() {
        let mut store = KeyedStateStore::new();
        let window = id("m", "k", 0, 10);
        store.upsert(&window, WindowType::Tumbling, 1, EventType::PageView, None);

        assert!(store.remove(&window).is_some());
        assert!(store.remove(&window).is_none());
        assert!(store.is_empty());
    }
}
