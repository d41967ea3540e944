//! Event processing pipeline
//!
//! The pipeline has two layers:
//! - [`AnalyticsEngine`]: the synchronous, deterministic core. It decodes
//!   records, tracks the watermark, assigns windows, fires them through the
//!   scheduler, runs the pattern matcher and produces [`EngineOutput`]s.
//! - [`Worker`]: the async loop around one engine. It polls an
//!   [`EventSource`], queues outputs for the sinks, takes periodic
//!   checkpoints and commits offsets once they are durable.
//!
//! # Example
//!
//! ```rust,no_run
//! use processor::config::EngineConfig;
//! use processor::pipeline::Worker;
//! use processor::sink::CollectingSink;
//! use processor::source::MemorySource;
//! use processor::state::FileCheckpointStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::load(None)?;
//! let sink = CollectingSink::new();
//! let store = Arc::new(FileCheckpointStore::new(config.checkpoint.directory.clone()));
//!
//! let worker = Worker::new(
//!     config,
//!     MemorySource::new(4),
//!     Arc::new(sink.clone()),
//!     Arc::new(sink),
//!     store,
//! )?;
//! let handle = worker.spawn();
//!
//! println!("watermark: {}", handle.status().watermark);
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`EngineOutput`]: crate::sink::EngineOutput
//! [`EventSource`]: crate::source::EventSource

pub mod engine;
pub mod worker;

pub use engine::{AnalyticsEngine, EngineStats};
pub use worker::{Worker, WorkerHandle, WorkerState, WorkerStatus};
