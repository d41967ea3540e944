//! Input sources
//!
//! An [`EventSource`] is a pull-based, ordered-per-partition record stream
//! with explicit offsets. The worker seeks it to the offsets of a restored
//! checkpoint and commits offsets only after a checkpoint holding them has
//! been persisted.

mod memory;

pub use memory::MemorySource;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;

/// One raw record read from a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub partition: u32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

impl SourceRecord {
    pub fn new(partition: u32, offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            partition,
            offset,
            payload: payload.into(),
        }
    }
}

/// Pull interface over a partitioned log
#[async_trait]
pub trait EventSource: Send {
    /// Source name for logs
    fn name(&self) -> &str;

    /// Next record, or `None` when nothing is available right now
    async fn poll(&mut self) -> Result<Option<SourceRecord>>;

    /// Resume reading each listed partition at the given offset
    async fn seek(&mut self, offsets: &BTreeMap<u32, i64>) -> Result<()>;

    /// Acknowledge everything before the given offsets
    async fn commit(&mut self, offsets: &BTreeMap<u32, i64>) -> Result<()>;

    /// Whether a bounded source has delivered all of its records
    fn is_exhausted(&self) -> bool {
        false
    }
}
