//! State management for the analytics engine
//!
//! This module holds everything the engine needs to keep and recover state:
//!
//! - **Keyed window state**: [`KeyedStateStore`], one entry per
//!   `(metric, key, start, end)` window with its accumulator and lifecycle
//! - **Byte backends**: the [`StateBackend`] trait and the in-memory
//!   [`MemoryStateBackend`]
//! - **Checkpointing**: [`Checkpoint`] snapshots of engine state, the
//!   [`CheckpointStore`] implementations they are persisted in, and the
//!   [`CheckpointCoordinator`] that runs at most one write at a time
//!
//! ## Checkpointing
//!
//! ```rust,no_run
//! use processor::state::{CheckpointCoordinator, EngineSnapshot, FileCheckpointStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(FileCheckpointStore::new("/var/lib/analytics/checkpoints"));
//!     let mut coordinator = CheckpointCoordinator::new(store, 1);
//!
//!     if let Some((metadata, snapshot)) = coordinator.restore_latest().await? {
//!         println!("Restored checkpoint {} at {:?}", metadata.checkpoint_id, snapshot.offsets);
//!     }
//!
//!     coordinator.begin(EngineSnapshot::default(), None)?;
//!     if let Some(outcome) = coordinator.wait_in_flight().await {
//!         println!("{:?}", outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod checkpoint;
pub mod keyed;
pub mod memory;

pub use backend::StateBackend;
pub use checkpoint::{
    BackendCheckpointStore, Checkpoint, CheckpointCoordinator, CheckpointMetadata,
    CheckpointOutcome, CheckpointStats, CheckpointStore, EngineSnapshot, FileCheckpointStore,
    CHECKPOINT_FORMAT_VERSION,
};
pub use keyed::{KeyedStateStore, Upsert, WindowEntry};
pub use memory::{MemoryBackendStats, MemoryStateBackend};
