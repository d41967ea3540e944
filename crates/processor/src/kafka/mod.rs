//! Kafka integration
//!
//! Available with the `kafka` feature.
//!
//! - [`KafkaEventSource`]: consumer with manual partition assignment and
//!   manual offset commits, so offsets are only committed once a checkpoint
//!   holding them is durable
//! - [`KafkaRecordSink`]: producer writing metric and alert records as JSON,
//!   keyed by `metricId` / `alertId` so downstream consumers can deduplicate
//!
//! # Example
//!
//! ```rust,no_run
//! use processor::kafka::{KafkaConfig, KafkaEventSource, KafkaRecordSink};
//! use std::sync::Arc;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = KafkaConfig {
//!     partitions: vec![0, 1],
//!     ..Default::default()
//! };
//! let source = KafkaEventSource::new(&config)?;
//! let sink = Arc::new(KafkaRecordSink::new(&config)?);
//! # Ok(())
//! # }
//! ```

mod config;
mod sink;
mod source;

pub use config::KafkaConfig;
pub use sink::KafkaRecordSink;
pub use source::KafkaEventSource;
