//! Data model for the stream analytics engine
//!
//! This crate holds the types shared between the engine, its sources and
//! sinks: the tracker wire envelope, decoded events, metric records and alert
//! records.

pub mod alerts;
pub mod errors;
pub mod events;
pub mod metrics;

pub use alerts::{AlertRecord, Severity, ALERT_SOURCE};
pub use errors::{Result, TypesError};
pub use events::{
    partition_for_key, AnalyticsEvent, ConversionData, EventEnvelope, EventMetadata,
    EventPayload, EventType, PageViewData, SessionData,
};
pub use metrics::{MetricRecord, METRIC_SOURCE};
