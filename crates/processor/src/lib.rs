//! Keyed event-time window and pattern engine for web analytics streams
//!
//! This crate turns a partitioned stream of tracker events into windowed
//! metric records and pattern alerts, with bounded out-of-order tolerance and
//! checkpoint-based recovery.
//!
//! The moving parts, leaf first:
//! - [`decoder`]: raw payloads to [`analytics_types::AnalyticsEvent`]s
//! - [`watermark`]: per-partition and merged event-time watermarks
//! - [`window`]: tumbling, sliding and session window assignment
//! - [`state`]: keyed window state and checkpoints
//! - [`scheduler`]: watermark-driven window firing and purging
//! - [`pattern`]: per-key pattern predicates (bounce, activity bursts)
//! - [`pipeline`]: the deterministic engine and the async worker around it

pub mod aggregation;
pub mod config;
pub mod decoder;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod metrics;
pub mod pattern;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod state;
pub mod watermark;
pub mod window;

pub use aggregation::{AggregateFunction, AggregateResult, AggregateState, ValueField};

pub use config::{
    CheckpointConfig, EngineConfig, KeySelector, MetricDefinition, PatternConfig, RecoveryMode,
    SinkConfig, WatermarkConfig, WindowConfig,
};

pub use decoder::EventDecoder;

pub use error::{
    CheckpointError, DecodeError, ProcessorError, Result as ProcessorResult, SinkError,
    StateError, WindowError,
};

pub use pattern::{PatternMatcher, PatternPredicate};

pub use pipeline::{AnalyticsEngine, EngineStats, Worker, WorkerHandle, WorkerStatus};

pub use scheduler::{FiredWindow, FiringScheduler};

pub use sink::{AlertSink, CollectingSink, EngineOutput, MetricSink, OutputEmitter};

pub use source::{EventSource, MemorySource, SourceRecord};

pub use state::{
    CheckpointCoordinator, CheckpointStore, EngineSnapshot, FileCheckpointStore, KeyedStateStore,
};

pub use watermark::{BoundedOutOfOrdernessWatermark, Watermark, WatermarkGenerator};

pub use window::{WindowAssigner, WindowBounds, WindowId, WindowType};
