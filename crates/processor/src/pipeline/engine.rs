//! Deterministic engine core
//!
//! [`AnalyticsEngine`] owns every piece of mutable state of one worker: the
//! watermark tracker, the keyed window store, the firing scheduler, the
//! pattern matcher and the per-partition input offsets. It performs no I/O
//! and never reads the clock for event-time decisions, so replaying the same
//! records from the same snapshot produces the same outputs.

use analytics_types::{AlertRecord, AnalyticsEvent, MetricRecord, METRIC_SOURCE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::config::{EngineConfig, MetricDefinition};
use crate::decoder::EventDecoder;
use crate::error::{DecodeError, Result, WindowError};
use crate::metrics::EngineMetrics;
use crate::pattern::{PatternMatcher, PatternStats};
use crate::scheduler::{FiredWindow, FiringScheduler};
use crate::sink::EngineOutput;
use crate::source::SourceRecord;
use crate::state::{EngineSnapshot, KeyedStateStore, WindowEntry};
use crate::watermark::{
    BoundedOutOfOrdernessWatermark, LateEventHandler, LateEventStats, Watermark,
    WatermarkGenerator,
};
use crate::window::{
    EventTimeTrigger, WindowAssigner, WindowBounds, WindowId, WindowLifecycle, WindowMerger,
    WindowType,
};

/// Counters of one engine instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Records read from the source, decodable or not
    pub records_processed: u64,

    /// Events that passed decoding
    pub events_processed: u64,

    /// Records rejected by the decoder
    pub decode_errors: u64,

    /// Events dropped as late by at least one metric definition
    pub late_events: u64,

    pub windows_created: u64,
    pub windows_fired: u64,
    pub windows_refired: u64,
    pub windows_purged: u64,

    /// Session windows absorbed into another session
    pub sessions_merged: u64,

    pub metrics_emitted: u64,
    pub alerts_emitted: u64,

    /// Current watermark timestamp
    pub current_watermark: i64,
}

/// Runtime form of one metric definition
struct DefinitionRuntime {
    definition: MetricDefinition,
    assigner: Box<dyn WindowAssigner>,
    late_events: LateEventHandler,
}

impl DefinitionRuntime {
    fn new(definition: MetricDefinition) -> Result<Self> {
        let assigner = definition.window.assigner()?;
        let late_events =
            LateEventHandler::new(definition.window.allowed_lateness_ms as i64, true);
        Ok(Self {
            definition,
            assigner,
            late_events,
        })
    }
}

/// Keyed event-time window and pattern engine
pub struct AnalyticsEngine {
    decoder: EventDecoder,
    watermark: BoundedOutOfOrdernessWatermark,
    definitions: Vec<DefinitionRuntime>,
    store: KeyedStateStore,
    scheduler: FiringScheduler,
    patterns: PatternMatcher,
    offsets: BTreeMap<u32, i64>,
    metrics: EngineMetrics,
    stats: EngineStats,
}

impl AnalyticsEngine {
    /// Create an engine from a validated configuration
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let mut scheduler = FiringScheduler::new();
        let mut definitions = Vec::with_capacity(config.metrics.len());
        for definition in &config.metrics {
            scheduler.set_trigger(
                definition.name.clone(),
                Arc::new(EventTimeTrigger::new(
                    definition.window.allowed_lateness_ms as i64,
                )),
            );
            definitions.push(DefinitionRuntime::new(definition.clone())?);
        }

        info!(
            worker_id = %config.worker_id,
            metrics = definitions.len(),
            max_out_of_orderness_ms = config.watermark.max_out_of_orderness_ms,
            "Created analytics engine"
        );

        Ok(Self {
            decoder: EventDecoder::new(),
            watermark: BoundedOutOfOrdernessWatermark::with_config(
                config.watermark.generator_config(),
            ),
            definitions,
            store: KeyedStateStore::new(),
            scheduler,
            patterns: PatternMatcher::from_config(&config.patterns),
            offsets: BTreeMap::new(),
            metrics: EngineMetrics::new(),
            stats: EngineStats::default(),
        })
    }

    /// Report into an existing set of metrics instead of a private one
    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Decode and process one source record
    ///
    /// The record's offset counts as consumed even when it cannot be decoded.
    pub fn process_record(
        &mut self,
        record: &SourceRecord,
    ) -> std::result::Result<Vec<EngineOutput>, DecodeError> {
        self.stats.records_processed += 1;
        self.offsets.insert(record.partition, record.offset + 1);

        match self
            .decoder
            .decode(record.partition, record.offset, &record.payload)
        {
            Ok(event) => Ok(self.process_event(record.partition, &event)),
            Err(error) => {
                self.stats.decode_errors += 1;
                self.metrics.decode_errors.inc();
                warn!(
                    partition = error.partition,
                    offset = error.offset,
                    reason = %error.reason,
                    "Skipping malformed record"
                );
                Err(error)
            }
        }
    }

    /// Process one decoded event read from `partition`
    pub fn process_event(&mut self, partition: u32, event: &AnalyticsEvent) -> Vec<EngineOutput> {
        self.stats.events_processed += 1;
        self.metrics.events_processed.inc();

        let before = self.watermark.current_watermark();
        let advanced = self.watermark.on_event(event.event_time, partition);
        let watermark = self.watermark.current_watermark().timestamp;

        let mut outputs = Vec::new();
        let mut dropped = false;

        let Self {
            definitions,
            store,
            scheduler,
            metrics,
            stats,
            ..
        } = self;

        for runtime in definitions.iter() {
            let definition = &runtime.definition;
            if !definition.accepts(event.event_type) {
                continue;
            }
            let Some(key) = definition.key_by.select(event) else {
                continue;
            };

            let lateness = if before.is_min() {
                0
            } else {
                before.timestamp.saturating_sub(event.event_time)
            };
            if !runtime.late_events.handle_late_event(lateness, partition) {
                dropped = true;
                debug!(
                    metric = %definition.name,
                    key = %key,
                    error = %WindowError::LateEvent {
                        event_time: event.event_time,
                        watermark: before.timestamp,
                        allowed_lateness: runtime.late_events.allowed_lateness_ms(),
                    },
                    "Dropped late event"
                );
                continue;
            }

            let value = definition.aggregate.extract(event);
            let window_type = runtime.assigner.window_type();

            for bounds in runtime.assigner.assign_windows(event.event_time) {
                let id = if runtime.assigner.is_session_window() {
                    let (id, absorbed) = merge_session(
                        store,
                        scheduler,
                        &definition.name,
                        &key,
                        bounds,
                        event,
                        value,
                    );
                    if absorbed == 0 {
                        stats.windows_created += 1;
                    }
                    stats.sessions_merged += absorbed.saturating_sub(1) as u64;
                    id
                } else {
                    let id = WindowId::new(definition.name.as_str(), key.as_str(), bounds);
                    let upsert =
                        store.upsert(&id, window_type, event.event_time, event.event_type, value);
                    if upsert.created {
                        stats.windows_created += 1;
                    }
                    id
                };

                if let Some(fired) = scheduler.on_element(&id, store, watermark) {
                    if fired.revision > 0 {
                        debug!(window = %id, revision = fired.revision, "Late merge re-fired window");
                    }
                    outputs.extend(emit_metric(definition, &fired, metrics, stats));
                }
            }
        }

        if dropped {
            self.stats.late_events += 1;
            self.metrics.late_events.inc();
        }

        let alerts = self.patterns.on_event(event);
        self.emit_alerts(alerts, &mut outputs);

        if let Some(watermark) = advanced {
            outputs.extend(self.advance_to(watermark));
        }

        outputs
    }

    /// Re-evaluate idle partitions and fire whatever became due
    pub fn on_periodic_check(&mut self) -> Vec<EngineOutput> {
        match self.watermark.on_periodic_check() {
            Some(watermark) => self.advance_to(watermark),
            None => {
                self.refresh_gauges();
                Vec::new()
            }
        }
    }

    /// Fire every remaining window and close every pattern interval
    ///
    /// Used at the end of a bounded input. The engine must not receive
    /// further events afterwards.
    pub fn finish(&mut self) -> Vec<EngineOutput> {
        info!(
            active_windows = self.store.len(),
            "Flushing all windows at end of input"
        );
        self.advance_to(Watermark::max())
    }

    fn advance_to(&mut self, watermark: Watermark) -> Vec<EngineOutput> {
        let mut outputs = Vec::new();
        let outcome = self.scheduler.advance(watermark.timestamp, &mut self.store);

        for fired in &outcome.fired {
            let Some(runtime) = self
                .definitions
                .iter()
                .find(|runtime| runtime.definition.name == fired.id.metric)
            else {
                warn!(window = %fired.id, "Fired window has no metric definition");
                continue;
            };
            outputs.extend(emit_metric(
                &runtime.definition,
                fired,
                &self.metrics,
                &mut self.stats,
            ));
        }

        self.stats.windows_purged += outcome.purged as u64;
        self.metrics.windows_purged.inc_by(outcome.purged as u64);

        let alerts = self.patterns.advance(&watermark);
        self.emit_alerts(alerts, &mut outputs);

        self.refresh_gauges();
        trace!(watermark = %watermark, outputs = outputs.len(), "Advanced engine watermark");
        outputs
    }

    fn emit_alerts(&mut self, alerts: Vec<AlertRecord>, outputs: &mut Vec<EngineOutput>) {
        for alert in alerts {
            self.stats.alerts_emitted += 1;
            self.metrics.record_alert(&alert.alert_type);
            debug!(
                alert_id = %alert.alert_id,
                alert_type = %alert.alert_type,
                "Pattern matched"
            );
            outputs.push(EngineOutput::Alert(alert));
        }
    }

    fn refresh_gauges(&mut self) {
        let watermark = self.watermark.current_watermark().timestamp;
        self.stats.current_watermark = watermark;
        self.metrics.watermark_ms.set(watermark);
        self.metrics.active_windows.set(self.store.len() as i64);
    }

    /// Capture the full engine state
    pub fn snapshot(&self) -> Result<EngineSnapshot> {
        Ok(EngineSnapshot {
            offsets: self.offsets.clone(),
            watermark: self.watermark.snapshot(),
            window_state: self.store.snapshot()?,
            pattern_state: self.patterns.snapshot()?,
        })
    }

    /// Replace the engine state with a snapshot
    pub fn restore(&mut self, snapshot: &EngineSnapshot) -> Result<()> {
        let mut store = KeyedStateStore::new();
        store.restore(&snapshot.window_state)?;
        self.patterns.restore(&snapshot.pattern_state)?;

        self.store = store;
        self.scheduler.rebuild(&self.store);
        self.watermark.restore(&snapshot.watermark);
        self.offsets = snapshot.offsets.clone();
        self.refresh_gauges();

        info!(
            windows = self.store.len(),
            timers = self.scheduler.pending(),
            watermark = %self.watermark.current_watermark(),
            offsets = ?self.offsets,
            "Restored engine state"
        );
        Ok(())
    }

    pub fn current_watermark(&self) -> Watermark {
        self.watermark.current_watermark()
    }

    pub fn partition_watermark(&self, partition: u32) -> Option<Watermark> {
        self.watermark.partition_watermark(partition)
    }

    /// Next offset to read per partition
    pub fn offsets(&self) -> &BTreeMap<u32, i64> {
        &self.offsets
    }

    pub fn active_windows(&self) -> usize {
        self.store.len()
    }

    /// Live window count per key, over all definitions
    pub fn active_windows_per_key(&self) -> BTreeMap<String, usize> {
        self.store.active_windows_per_key()
    }

    /// State of a single window, if it is still held
    pub fn window(&self, id: &WindowId) -> Option<&WindowEntry> {
        self.store.entry(id)
    }

    /// Live windows of one definition and key
    pub fn windows_for_key(&self, metric: &str, key: &str) -> Vec<WindowId> {
        self.store
            .windows_for_key(metric, key)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn pattern_stats(&self) -> PatternStats {
        self.patterns.stats()
    }

    /// Late event handling per metric definition
    pub fn late_events_by_metric(&self) -> BTreeMap<String, LateEventStats> {
        self.definitions
            .iter()
            .map(|runtime| {
                (
                    runtime.definition.name.clone(),
                    runtime.late_events.get_stats(),
                )
            })
            .collect()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.iter().map(|runtime| &runtime.definition)
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }
}

impl std::fmt::Debug for AnalyticsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsEngine")
            .field("watermark", &self.watermark.current_watermark())
            .field("definitions", &self.definitions.len())
            .field("active_windows", &self.store.len())
            .field("offsets", &self.offsets)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Merge the proto-window of an event into the key's sessions
///
/// Returns the id of the resulting session and how many existing sessions
/// it absorbed. A merged session stays FIRED if any absorbed session had
/// fired, so the scheduler re-fires it with the merged result.
fn merge_session(
    store: &mut KeyedStateStore,
    scheduler: &mut FiringScheduler,
    metric: &str,
    key: &str,
    proto: WindowBounds,
    event: &AnalyticsEvent,
    value: Option<f64>,
) -> (WindowId, usize) {
    let existing: Vec<WindowBounds> = store
        .windows_for_key(metric, key)
        .map(|(id, _)| id.bounds())
        .collect();
    let merge = WindowMerger::merge(proto, existing);
    let id = WindowId::new(metric, key, merge.merged);

    if merge.is_new() {
        store.upsert(
            &id,
            WindowType::Session,
            event.event_time,
            event.event_type,
            value,
        );
        return (id, 0);
    }

    let mut entry = WindowEntry::new(WindowType::Session);
    for bounds in &merge.absorbed {
        let absorbed = WindowId::new(metric, key, *bounds);
        scheduler.unregister(&absorbed);
        let Some(old) = store.remove(&absorbed) else {
            continue;
        };
        entry.state.merge(&old.state);
        entry.lifecycle = match (entry.lifecycle, old.lifecycle) {
            (WindowLifecycle::Fired { revision: a }, WindowLifecycle::Fired { revision: b }) => {
                WindowLifecycle::Fired {
                    revision: a.max(b),
                }
            }
            (_, WindowLifecycle::Fired { revision }) => WindowLifecycle::Fired { revision },
            (current, _) => current,
        };
    }
    entry
        .state
        .add(event.event_time, event.event_type, value);

    trace!(
        window = %id,
        absorbed = merge.absorbed.len(),
        lifecycle = %entry.lifecycle,
        "Merged session window"
    );
    store.insert_entry(id.clone(), entry);
    (id, merge.absorbed.len())
}

/// Turn a fired window into a metric record
///
/// Windows whose aggregate has no value produce no record.
fn emit_metric(
    definition: &MetricDefinition,
    fired: &FiredWindow,
    metrics: &EngineMetrics,
    stats: &mut EngineStats,
) -> Option<EngineOutput> {
    metrics.record_fired(&definition.name, fired.revision);
    if fired.revision == 0 {
        stats.windows_fired += 1;
    } else {
        stats.windows_refired += 1;
    }

    let bounds = fired.id.bounds();
    let Some(result) = definition.aggregate.evaluate(&fired.state, &bounds) else {
        trace!(window = %fired.id, "Window has no value, no metric emitted");
        return None;
    };

    let mut dimensions = definition.dimensions.clone();
    if let Some(dimension) = definition.key_by.dimension() {
        dimensions.insert(dimension.to_string(), fired.id.key.clone());
    }

    stats.metrics_emitted += 1;
    Some(EngineOutput::Metric(MetricRecord {
        metric_id: definition.metric_id(&fired.id.key, bounds.start),
        timestamp: bounds.end,
        window_start: bounds.start,
        window_end: bounds.end,
        metric_type: definition.name.clone(),
        value: result.value,
        count: result.count,
        dimensions,
        tags: definition.tags.clone(),
        source: METRIC_SOURCE.to_string(),
        revision: fired.revision,
    }))
}
