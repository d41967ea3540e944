use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::{EventSource, SourceRecord};
use crate::error::{ProcessorError, Result};
use analytics_types::{partition_for_key, AnalyticsEvent};

#[derive(Debug, Default)]
struct Log {
    partitions: BTreeMap<u32, Vec<Vec<u8>>>,
    committed: BTreeMap<u32, i64>,
    closed: bool,
}

/// In-memory partitioned log
///
/// Clones share the log and the committed offsets; each clone reads with its
/// own positions. [`MemorySource::reopen`] models a restarted consumer that
/// resumes from the committed offsets.
#[derive(Debug, Clone)]
pub struct MemorySource {
    log: Arc<Mutex<Log>>,
    positions: BTreeMap<u32, i64>,
    next_partition: u32,
    partition_count: u32,
}

impl MemorySource {
    pub fn new(partition_count: u32) -> Self {
        let partition_count = partition_count.max(1);
        let log = Log {
            partitions: (0..partition_count).map(|p| (p, Vec::new())).collect(),
            ..Default::default()
        };
        Self {
            log: Arc::new(Mutex::new(log)),
            positions: (0..partition_count).map(|p| (p, 0)).collect(),
            next_partition: 0,
            partition_count,
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Append a raw payload, returning its offset
    pub fn push(&self, partition: u32, payload: impl Into<Vec<u8>>) -> Result<i64> {
        let mut log = self.log.lock();
        let records = log
            .partitions
            .get_mut(&partition)
            .ok_or_else(|| ProcessorError::Source {
                source: format!("unknown partition {}", partition).into(),
            })?;
        records.push(payload.into());
        Ok(records.len() as i64 - 1)
    }

    /// Append an event to the partition owning its key
    pub fn push_event(&self, event: &AnalyticsEvent) -> Result<(u32, i64)> {
        let partition = partition_for_key(&event.key, self.partition_count);
        let payload = serde_json::to_vec(&event.to_envelope())?;
        let offset = self.push(partition, payload)?;
        Ok((partition, offset))
    }

    /// Mark the end of input
    pub fn close(&self) {
        self.log.lock().closed = true;
    }

    /// Offsets acknowledged by the last commit
    pub fn committed(&self) -> BTreeMap<u32, i64> {
        self.log.lock().committed.clone()
    }

    /// A new reader over the same log, positioned at the committed offsets
    pub fn reopen(&self) -> Self {
        let committed = self.committed();
        let mut positions: BTreeMap<u32, i64> = (0..self.partition_count).map(|p| (p, 0)).collect();
        positions.extend(committed);
        Self {
            log: Arc::clone(&self.log),
            positions,
            next_partition: 0,
            partition_count: self.partition_count,
        }
    }

    /// Current read position of a partition
    pub fn position(&self, partition: u32) -> Option<i64> {
        self.positions.get(&partition).copied()
    }
}

#[async_trait]
impl EventSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    /// Round-robin over partitions with pending records
    async fn poll(&mut self) -> Result<Option<SourceRecord>> {
        let log = self.log.lock();

        for step in 0..self.partition_count {
            let partition = (self.next_partition + step) % self.partition_count;
            let position = self.positions.get(&partition).copied().unwrap_or(0);
            let Some(payload) = log
                .partitions
                .get(&partition)
                .and_then(|records| records.get(position as usize))
            else {
                continue;
            };

            let record = SourceRecord::new(partition, position, payload.clone());
            self.positions.insert(partition, position + 1);
            self.next_partition = (partition + 1) % self.partition_count;
            return Ok(Some(record));
        }

        Ok(None)
    }

    async fn seek(&mut self, offsets: &BTreeMap<u32, i64>) -> Result<()> {
        for (partition, offset) in offsets {
            if *partition >= self.partition_count || *offset < 0 {
                return Err(ProcessorError::Source {
                    source: format!("cannot seek partition {} to {}", partition, offset).into(),
                });
            }
            self.positions.insert(*partition, *offset);
        }
        debug!(offsets = ?offsets, "Seeked memory source");
        Ok(())
    }

    async fn commit(&mut self, offsets: &BTreeMap<u32, i64>) -> Result<()> {
        let mut log = self.log.lock();
        for (partition, offset) in offsets {
            let committed = log.committed.entry(*partition).or_insert(0);
            *committed = (*committed).max(*offset);
        }
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        let log = self.log.lock();
        log.closed
            && log.partitions.iter().all(|(partition, records)| {
                self.positions.get(partition).copied().unwrap_or(0) >= records.len() as i64
            })
    }
}
