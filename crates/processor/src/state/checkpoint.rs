//! Checkpointing and recovery
//!
//! A checkpoint is the triple (keyed window state, pattern buffers, input
//! offsets) plus the watermark, persisted all-or-nothing. Only the latest
//! complete checkpoint is ever restored.
//!
//! The [`CheckpointCoordinator`] persists checkpoints on a background task so
//! that event intake continues while a write is in flight. At most one
//! checkpoint is in flight at a time; input offsets are handed back to the
//! caller for committing only after the write and the output flush barrier
//! both succeeded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::StateBackend;
use crate::error::{CheckpointError, CheckpointResult};
use crate::sink::FlushBarrier;
use crate::watermark::WatermarkSnapshot;

/// Version of the checkpoint format
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

const FILE_PREFIX: &str = "checkpoint-";
const FILE_SUFFIX: &str = ".ckpt";
const BACKEND_PREFIX: &str = "checkpoint/";
const BACKEND_LATEST: &[u8] = b"checkpoint/latest";

/// Everything the engine needs to resume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Next offset to read, per input partition
    pub offsets: BTreeMap<u32, i64>,
    pub watermark: WatermarkSnapshot,
    /// Serialized keyed window state
    pub window_state: Vec<u8>,
    /// Serialized pattern buffers
    pub pattern_state: Vec<u8>,
}

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Monotonically increasing checkpoint identifier
    pub checkpoint_id: u64,
    /// When the checkpoint was created
    pub created_at: DateTime<Utc>,
    /// Size of the payload in bytes
    pub size_bytes: u64,
    /// SHA-256 of the payload, hex encoded
    pub checksum: String,
    /// Version of the checkpoint format
    pub version: u32,
}

/// A checkpoint: metadata plus the serialized [`EngineSnapshot`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub metadata: CheckpointMetadata,
    pub payload: Vec<u8>,
}

impl Checkpoint {
    /// Create a new checkpoint
    pub fn new(checkpoint_id: u64, snapshot: &EngineSnapshot) -> CheckpointResult<Self> {
        let payload = bincode::serialize(snapshot).map_err(|e| CheckpointError::WriteFailed {
            checkpoint_id,
            reason: format!("failed to serialize snapshot: {}", e),
        })?;

        Ok(Self {
            metadata: CheckpointMetadata {
                checkpoint_id,
                created_at: Utc::now(),
                size_bytes: payload.len() as u64,
                checksum: Self::calculate_checksum(&payload),
                version: CHECKPOINT_FORMAT_VERSION,
            },
            payload,
        })
    }

    /// Calculate SHA-256 checksum of the payload
    fn calculate_checksum(payload: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        format!("{:x}", hasher.finalize())
    }

    pub fn id(&self) -> u64 {
        self.metadata.checkpoint_id
    }

    /// Validate the checkpoint's integrity
    pub fn validate(&self) -> CheckpointResult<()> {
        if self.metadata.version != CHECKPOINT_FORMAT_VERSION {
            return Err(CheckpointError::RestoreFailed {
                checkpoint: self.id().to_string(),
                reason: format!("unsupported format version {}", self.metadata.version),
            });
        }

        let calculated = Self::calculate_checksum(&self.payload);
        if calculated != self.metadata.checksum {
            return Err(CheckpointError::ChecksumMismatch {
                checkpoint_id: self.id(),
                expected: self.metadata.checksum.clone(),
                actual: calculated,
            });
        }

        Ok(())
    }

    /// Serialize for storage
    pub fn encode(&self) -> CheckpointResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CheckpointError::WriteFailed {
            checkpoint_id: self.id(),
            reason: e.to_string(),
        })
    }

    /// Deserialize and validate a stored checkpoint
    pub fn decode(source: &str, bytes: &[u8]) -> CheckpointResult<Self> {
        let checkpoint: Checkpoint =
            bincode::deserialize(bytes).map_err(|e| CheckpointError::RestoreFailed {
                checkpoint: source.to_string(),
                reason: e.to_string(),
            })?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// The engine snapshot carried by this checkpoint
    pub fn snapshot(&self) -> CheckpointResult<EngineSnapshot> {
        bincode::deserialize(&self.payload).map_err(|e| CheckpointError::RestoreFailed {
            checkpoint: self.id().to_string(),
            reason: format!("invalid snapshot payload: {}", e),
        })
    }
}

/// Durable checkpoint storage
///
/// `write` must be atomic: after a failed or interrupted write, `latest`
/// still returns the previous checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint
    async fn write(&self, checkpoint: &Checkpoint) -> CheckpointResult<()>;

    /// Identifier of the latest complete checkpoint
    async fn latest_id(&self) -> CheckpointResult<Option<u64>>;

    /// Read a checkpoint by id
    async fn read(&self, checkpoint_id: u64) -> CheckpointResult<Checkpoint>;

    /// Delete all but the `retain` newest checkpoints, returning how many were removed
    async fn prune(&self, retain: usize) -> CheckpointResult<usize>;

    /// The latest complete checkpoint, if any
    async fn latest(&self) -> CheckpointResult<Option<Checkpoint>> {
        match self.latest_id().await? {
            Some(id) => Ok(Some(self.read(id).await?)),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String;
}

/// Checkpoints as files in a directory
///
/// Each checkpoint is written to a temporary file, synced and renamed into
/// place, so a crash never leaves a partial `checkpoint-*.ckpt` behind.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    directory: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, checkpoint_id: u64) -> PathBuf {
        self.directory
            .join(format!("{}{:020}{}", FILE_PREFIX, checkpoint_id, FILE_SUFFIX))
    }

    fn parse_id(file_name: &str) -> Option<u64> {
        file_name
            .strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?
            .parse()
            .ok()
    }

    /// Remove temporary files left behind by interrupted writes
    async fn remove_stray_temp_files(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.directory).await else {
            return;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&format!(".{}", FILE_PREFIX)) && name.ends_with(".tmp") {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => debug!(file = name, "Removed stray checkpoint temp file"),
                    Err(e) => warn!(file = name, error = %e, "Failed to remove temp file"),
                }
            }
        }
    }

    async fn list_ids(&self) -> std::io::Result<Vec<u64>> {
        let mut ids = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = entry.file_name().to_str().and_then(Self::parse_id) {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }
}

/// Make a rename within `directory` durable
async fn sync_directory(directory: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    tokio::fs::File::open(directory).await?.sync_all().await?;
    #[cfg(not(unix))]
    let _ = directory;
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn write(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        let checkpoint_id = checkpoint.id();
        let fail = |reason: String| CheckpointError::WriteFailed {
            checkpoint_id,
            reason,
        };

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| fail(format!("failed to create directory: {}", e)))?;

        let bytes = checkpoint.encode()?;
        let tmp_path = self
            .directory
            .join(format!(".{}{}.tmp", FILE_PREFIX, checkpoint_id));
        let final_path = self.path_for(checkpoint_id);

        let result: std::io::Result<()> = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &final_path).await?;
            sync_directory(&self.directory).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(fail(format!("failed to write {:?}: {}", final_path, e)));
        }

        debug!(
            checkpoint_id = checkpoint_id,
            path = ?final_path,
            bytes = bytes.len(),
            "Checkpoint file written"
        );

        Ok(())
    }

    async fn latest_id(&self) -> CheckpointResult<Option<u64>> {
        let ids = self
            .list_ids()
            .await
            .map_err(|e| CheckpointError::RestoreFailed {
                checkpoint: self.directory.to_string_lossy().to_string(),
                reason: format!("failed to list checkpoints: {}", e),
            })?;
        Ok(ids.last().copied())
    }

    async fn read(&self, checkpoint_id: u64) -> CheckpointResult<Checkpoint> {
        let path = self.path_for(checkpoint_id);
        let source = path.to_string_lossy().to_string();

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| CheckpointError::RestoreFailed {
                checkpoint: source.clone(),
                reason: format!("failed to read file: {}", e),
            })?;

        Checkpoint::decode(&source, &bytes)
    }

    async fn prune(&self, retain: usize) -> CheckpointResult<usize> {
        let ids = self
            .list_ids()
            .await
            .map_err(|e| CheckpointError::WriteFailed {
                checkpoint_id: 0,
                reason: format!("failed to list checkpoints: {}", e),
            })?;

        let excess = ids.len().saturating_sub(retain.max(1));
        let mut removed = 0;

        for id in &ids[..excess] {
            match tokio::fs::remove_file(self.path_for(*id)).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(checkpoint_id = id, error = %e, "Failed to remove old checkpoint"),
            }
        }

        self.remove_stray_temp_files().await;
        Ok(removed)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.directory.display())
    }
}

/// Checkpoints stored in a [`StateBackend`]
///
/// The blob is written under its own key before the `checkpoint/latest`
/// pointer is moved, so readers never observe a partial checkpoint.
#[derive(Debug, Clone)]
pub struct BackendCheckpointStore<B> {
    backend: B,
}

impl<B: StateBackend> BackendCheckpointStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn key_for(checkpoint_id: u64) -> Vec<u8> {
        format!("{}{:020}", BACKEND_PREFIX, checkpoint_id).into_bytes()
    }

    fn parse_key(key: &[u8]) -> Option<u64> {
        std::str::from_utf8(key)
            .ok()?
            .strip_prefix(BACKEND_PREFIX)?
            .parse()
            .ok()
    }
}

#[async_trait]
impl<B: StateBackend> CheckpointStore for BackendCheckpointStore<B> {
    async fn write(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        let checkpoint_id = checkpoint.id();
        let bytes = checkpoint.encode()?;

        self.backend
            .put(&Self::key_for(checkpoint_id), &bytes)
            .await
            .map_err(|e| CheckpointError::WriteFailed {
                checkpoint_id,
                reason: e.to_string(),
            })?;

        self.backend
            .put(BACKEND_LATEST, checkpoint_id.to_string().as_bytes())
            .await
            .map_err(|e| CheckpointError::WriteFailed {
                checkpoint_id,
                reason: format!("failed to move latest pointer: {}", e),
            })
    }

    async fn latest_id(&self) -> CheckpointResult<Option<u64>> {
        let pointer = self
            .backend
            .get(BACKEND_LATEST)
            .await
            .map_err(|e| CheckpointError::RestoreFailed {
                checkpoint: "latest".to_string(),
                reason: e.to_string(),
            })?;

        pointer
            .map(|bytes| {
                std::str::from_utf8(&bytes)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| CheckpointError::RestoreFailed {
                        checkpoint: "latest".to_string(),
                        reason: "corrupt latest pointer".to_string(),
                    })
            })
            .transpose()
    }

    async fn read(&self, checkpoint_id: u64) -> CheckpointResult<Checkpoint> {
        let source = checkpoint_id.to_string();
        let bytes = self
            .backend
            .get(&Self::key_for(checkpoint_id))
            .await
            .map_err(|e| CheckpointError::RestoreFailed {
                checkpoint: source.clone(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| CheckpointError::RestoreFailed {
                checkpoint: source.clone(),
                reason: "checkpoint blob missing".to_string(),
            })?;

        Checkpoint::decode(&source, &bytes)
    }

    async fn prune(&self, retain: usize) -> CheckpointResult<usize> {
        let keys = self
            .backend
            .list_keys(BACKEND_PREFIX.as_bytes())
            .await
            .map_err(|e| CheckpointError::WriteFailed {
                checkpoint_id: 0,
                reason: e.to_string(),
            })?;

        let mut ids: Vec<u64> = keys.iter().filter_map(|key| Self::parse_key(key)).collect();
        ids.sort_unstable();

        let excess = ids.len().saturating_sub(retain.max(1));
        for id in &ids[..excess] {
            self.backend
                .delete(&Self::key_for(*id))
                .await
                .map_err(|e| CheckpointError::WriteFailed {
                    checkpoint_id: *id,
                    reason: e.to_string(),
                })?;
        }

        Ok(excess)
    }

    fn describe(&self) -> String {
        "state-backend".to_string()
    }
}

/// Checkpoint statistics
#[derive(Debug, Clone, Default)]
pub struct CheckpointStats {
    /// Total number of checkpoints created
    pub checkpoints_created: u64,
    /// Total number of checkpoint failures
    pub checkpoint_failures: u64,
    /// Total number of restores
    pub restores: u64,
    /// Total number of restore failures
    pub restore_failures: u64,
    /// Id of the last completed checkpoint
    pub last_checkpoint_id: Option<u64>,
    /// Time of last successful checkpoint
    pub last_checkpoint_time: Option<DateTime<Utc>>,
    /// Duration of last checkpoint in milliseconds
    pub last_checkpoint_duration_ms: u64,
    /// Total bytes checkpointed
    pub total_bytes_checkpointed: u64,
}

/// Result of a finished checkpoint attempt
#[derive(Debug)]
pub enum CheckpointOutcome {
    /// Persisted; `offsets` may now be committed upstream
    Completed {
        checkpoint_id: u64,
        offsets: BTreeMap<u32, i64>,
    },
    /// Discarded; the previous checkpoint remains authoritative
    Failed {
        checkpoint_id: u64,
        error: CheckpointError,
    },
}

struct InFlight {
    checkpoint_id: u64,
    offsets: BTreeMap<u32, i64>,
    done: oneshot::Receiver<CheckpointResult<()>>,
    task: JoinHandle<()>,
}

/// Coordinates checkpoint creation and recovery
pub struct CheckpointCoordinator {
    store: Arc<dyn CheckpointStore>,
    retain: usize,
    next_id: u64,
    in_flight: Option<InFlight>,
    stats: Arc<RwLock<CheckpointStats>>,
}

impl CheckpointCoordinator {
    /// Create a new checkpoint coordinator
    pub fn new(store: Arc<dyn CheckpointStore>, retain: usize) -> Self {
        Self {
            store,
            retain: retain.max(1),
            next_id: 1,
            in_flight: None,
            stats: Arc::new(RwLock::new(CheckpointStats::default())),
        }
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.checkpoint_id)
    }

    /// Start persisting a snapshot in the background
    ///
    /// The write starts once `barrier` (if any) is reached, so a checkpoint
    /// never commits offsets ahead of undelivered outputs.
    pub fn begin(
        &mut self,
        snapshot: EngineSnapshot,
        barrier: Option<FlushBarrier>,
    ) -> CheckpointResult<u64> {
        if let Some(in_flight) = &self.in_flight {
            return Err(CheckpointError::InProgress {
                in_flight: in_flight.checkpoint_id,
            });
        }

        let checkpoint_id = self.next_id;
        self.next_id += 1;

        let offsets = snapshot.offsets.clone();
        let (tx, done) = oneshot::channel();
        let store = self.store.clone();
        let stats = self.stats.clone();
        let retain = self.retain;

        let task = tokio::spawn(async move {
            let result = persist(store, stats, checkpoint_id, snapshot, barrier, retain).await;
            let _ = tx.send(result);
        });

        self.in_flight = Some(InFlight {
            checkpoint_id,
            offsets,
            done,
            task,
        });

        debug!(checkpoint_id = checkpoint_id, "Checkpoint started");
        Ok(checkpoint_id)
    }

    /// Take the outcome of the in-flight checkpoint if it has finished
    pub fn poll_completed(&mut self) -> Option<CheckpointOutcome> {
        let in_flight = self.in_flight.as_mut()?;
        let result = match in_flight.done.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(aborted(in_flight.checkpoint_id)),
        };

        let in_flight = self.in_flight.take()?;
        Some(outcome(in_flight.checkpoint_id, in_flight.offsets, result))
    }

    /// Wait for the in-flight checkpoint, if any
    ///
    /// Cancel safe: if the wait is dropped the checkpoint stays in flight.
    pub async fn wait_in_flight(&mut self) -> Option<CheckpointOutcome> {
        let in_flight = self.in_flight.as_mut()?;
        let checkpoint_id = in_flight.checkpoint_id;
        let result = (&mut in_flight.done)
            .await
            .unwrap_or_else(|_| Err(aborted(checkpoint_id)));

        let in_flight = self.in_flight.take()?;
        Some(outcome(checkpoint_id, in_flight.offsets, result))
    }

    /// Abandon the in-flight checkpoint, if any
    ///
    /// The write is cancelled before or after its commit point, so the store
    /// holds either the previous checkpoint or this one in full. Its offsets
    /// are never committed.
    pub fn abort_in_flight(&mut self) -> Option<CheckpointOutcome> {
        let in_flight = self.in_flight.take()?;
        in_flight.task.abort();
        warn!(checkpoint_id = in_flight.checkpoint_id, "Aborted in-flight checkpoint");
        Some(CheckpointOutcome::Failed {
            checkpoint_id: in_flight.checkpoint_id,
            error: aborted(in_flight.checkpoint_id),
        })
    }

    /// Load the latest complete checkpoint
    ///
    /// Returns `Ok(None)` when no checkpoint exists. An unreadable latest
    /// checkpoint is an error; older checkpoints are never used in its place.
    /// New checkpoints are numbered after the latest one either way.
    pub async fn restore_latest(&mut self) -> CheckpointResult<Option<(CheckpointMetadata, EngineSnapshot)>> {
        let latest_id = match self.store.latest_id().await {
            Ok(id) => id,
            Err(e) => {
                self.stats.write().await.restore_failures += 1;
                return Err(e);
            }
        };

        let Some(checkpoint_id) = latest_id else {
            info!(store = %self.store.describe(), "No checkpoint found, starting fresh");
            return Ok(None);
        };

        self.next_id = self.next_id.max(checkpoint_id + 1);

        let restored = async {
            let checkpoint = self.store.read(checkpoint_id).await?;
            let snapshot = checkpoint.snapshot()?;
            Ok::<_, CheckpointError>((checkpoint.metadata, snapshot))
        }
        .await;

        let mut stats = self.stats.write().await;
        match restored {
            Ok((metadata, snapshot)) => {
                stats.restores += 1;
                info!(
                    checkpoint_id = metadata.checkpoint_id,
                    created_at = %metadata.created_at,
                    size_bytes = metadata.size_bytes,
                    partitions = snapshot.offsets.len(),
                    "Restored checkpoint"
                );
                Ok(Some((metadata, snapshot)))
            }
            Err(e) => {
                stats.restore_failures += 1;
                error!(checkpoint_id = checkpoint_id, error = %e, "Failed to restore checkpoint");
                Err(e)
            }
        }
    }

    /// Get checkpoint statistics
    pub async fn stats(&self) -> CheckpointStats {
        self.stats.read().await.clone()
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }
}

fn aborted(checkpoint_id: u64) -> CheckpointError {
    CheckpointError::WriteFailed {
        checkpoint_id,
        reason: "checkpoint task aborted".to_string(),
    }
}

fn outcome(
    checkpoint_id: u64,
    offsets: BTreeMap<u32, i64>,
    result: CheckpointResult<()>,
) -> CheckpointOutcome {
    match result {
        Ok(()) => CheckpointOutcome::Completed {
            checkpoint_id,
            offsets,
        },
        Err(error) => CheckpointOutcome::Failed {
            checkpoint_id,
            error,
        },
    }
}

async fn persist(
    store: Arc<dyn CheckpointStore>,
    stats: Arc<RwLock<CheckpointStats>>,
    checkpoint_id: u64,
    snapshot: EngineSnapshot,
    barrier: Option<FlushBarrier>,
    retain: usize,
) -> CheckpointResult<()> {
    let start = Instant::now();

    let result = async {
        if let Some(barrier) = barrier {
            barrier.wait().await.map_err(|e| CheckpointError::WriteFailed {
                checkpoint_id,
                reason: format!("output flush failed: {}", e),
            })?;
        }

        let checkpoint = Checkpoint::new(checkpoint_id, &snapshot)?;
        store.write(&checkpoint).await?;
        Ok::<_, CheckpointError>(checkpoint.metadata.size_bytes)
    }
    .await;

    let mut stats = stats.write().await;
    match result {
        Ok(size_bytes) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            stats.checkpoints_created += 1;
            stats.last_checkpoint_id = Some(checkpoint_id);
            stats.last_checkpoint_time = Some(Utc::now());
            stats.last_checkpoint_duration_ms = duration_ms;
            stats.total_bytes_checkpointed += size_bytes;
            drop(stats);

            info!(
                checkpoint_id = checkpoint_id,
                size_bytes = size_bytes,
                duration_ms = duration_ms,
                "Checkpoint completed"
            );

            match store.prune(retain).await {
                Ok(removed) if removed > 0 => debug!(removed = removed, "Pruned old checkpoints"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to prune old checkpoints"),
            }

            Ok(())
        }
        Err(e) => {
            stats.checkpoint_failures += 1;
            error!(checkpoint_id = checkpoint_id, error = %e, "Checkpoint failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use crate::sink::{CollectingSink, EngineOutput, OutputEmitter};
    use crate::state::MemoryStateBackend;
    use tempfile::TempDir;

    fn snapshot(offset: i64) -> EngineSnapshot {
        EngineSnapshot {
            offsets: BTreeMap::from([(0, offset), (1, offset * 2)]),
            watermark: WatermarkSnapshot {
                current: 1_000,
                partition_max: BTreeMap::from([(0, 6_000)]),
            },
            window_state: vec![1, 2, 3],
            pattern_state: vec![4, 5],
        }
    }

    #[test]
    fn test_checkpoint_validate() {
        let checkpoint = Checkpoint::new(1, &snapshot(10)).unwrap();
        assert!(checkpoint.validate().is_ok());
        assert_eq!(checkpoint.metadata.checksum.len(), 64);
        assert_eq!(checkpoint.snapshot().unwrap(), snapshot(10));

        let mut tampered = checkpoint.clone();
        tampered.payload[0] ^= 0xff;
        assert!(matches!(
            tampered.validate(),
            Err(CheckpointError::ChecksumMismatch { checkpoint_id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_file_store_latest_and_prune() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        assert!(store.latest().await.unwrap().is_none());

        for id in 1..=3 {
            store
                .write(&Checkpoint::new(id, &snapshot(id as i64)).unwrap())
                .await
                .unwrap();
        }

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.id(), 3);
        assert_eq!(latest.snapshot().unwrap(), snapshot(3));

        assert_eq!(store.prune(1).await.unwrap(), 2);
        assert_eq!(store.latest_id().await.unwrap(), Some(3));
        assert!(store.read(1).await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_ignores_temporary_files() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.write(&Checkpoint::new(1, &snapshot(1)).unwrap()).await.unwrap();
        tokio::fs::write(dir.path().join(".checkpoint-2.tmp"), b"partial")
            .await
            .unwrap();

        assert_eq!(store.latest_id().await.unwrap(), Some(1));

        store.prune(1).await.unwrap();
        assert!(!dir.path().join(".checkpoint-2.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_latest_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.write(&Checkpoint::new(1, &snapshot(1)).unwrap()).await.unwrap();
        tokio::fs::write(store.path_for(2), b"garbage").await.unwrap();

        assert!(matches!(
            store.latest().await,
            Err(CheckpointError::RestoreFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_backend_store() {
        let backend = MemoryStateBackend::new();
        let store = BackendCheckpointStore::new(backend.clone());

        assert!(store.latest().await.unwrap().is_none());

        store.write(&Checkpoint::new(1, &snapshot(1)).unwrap()).await.unwrap();
        store.write(&Checkpoint::new(2, &snapshot(2)).unwrap()).await.unwrap();

        assert_eq!(store.latest().await.unwrap().unwrap().id(), 2);
        assert_eq!(store.prune(1).await.unwrap(), 1);
        assert!(backend.contains(b"checkpoint/latest").await.unwrap());
        assert_eq!(backend.count().await.unwrap(), 2);
    }

    /// Backend whose writes always fail
    struct FailingBackend;

    #[async_trait]
    impl StateBackend for FailingBackend {
        async fn get(&self, _key: &[u8]) -> crate::error::StateResult<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn put(&self, _key: &[u8], _value: &[u8]) -> crate::error::StateResult<()> {
            Err(StateError::StorageError {
                backend_type: "failing".to_string(),
                details: "disk full".to_string(),
            })
        }

        async fn delete(&self, _key: &[u8]) -> crate::error::StateResult<()> {
            Ok(())
        }

        async fn list_keys(&self, _prefix: &[u8]) -> crate::error::StateResult<Vec<Vec<u8>>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_coordinator_completes_and_reports_offsets() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        let mut coordinator = CheckpointCoordinator::new(store, 1);

        let id = coordinator.begin(snapshot(7), None).unwrap();
        assert_eq!(coordinator.in_flight(), Some(id));

        match coordinator.wait_in_flight().await.unwrap() {
            CheckpointOutcome::Completed {
                checkpoint_id,
                offsets,
            } => {
                assert_eq!(checkpoint_id, id);
                assert_eq!(offsets, snapshot(7).offsets);
            }
            CheckpointOutcome::Failed { error, .. } => panic!("checkpoint failed: {}", error),
        }

        let stats = coordinator.stats().await;
        assert_eq!(stats.checkpoints_created, 1);
        assert_eq!(stats.last_checkpoint_id, Some(id));
        assert!(coordinator.poll_completed().is_none());
    }

    #[tokio::test]
    async fn test_no_concurrent_checkpoints() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        let mut coordinator = CheckpointCoordinator::new(store, 1);

        let first = coordinator.begin(snapshot(1), None).unwrap();
        assert!(matches!(
            coordinator.begin(snapshot(2), None),
            Err(CheckpointError::InProgress { in_flight }) if in_flight == first
        ));

        coordinator.wait_in_flight().await;
        assert!(coordinator.begin(snapshot(2), None).is_ok());
        coordinator.wait_in_flight().await;
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_checkpoint() {
        let backend = MemoryStateBackend::new();
        let good = Arc::new(BackendCheckpointStore::new(backend.clone()));
        let mut coordinator = CheckpointCoordinator::new(good, 1);
        coordinator.begin(snapshot(1), None).unwrap();
        coordinator.wait_in_flight().await;

        let mut failing = CheckpointCoordinator::new(Arc::new(BackendCheckpointStore::new(FailingBackend)), 1);
        failing.begin(snapshot(2), None).unwrap();
        assert!(matches!(
            failing.wait_in_flight().await,
            Some(CheckpointOutcome::Failed { .. })
        ));
        assert_eq!(failing.stats().await.checkpoint_failures, 1);

        let mut restarted = CheckpointCoordinator::new(Arc::new(BackendCheckpointStore::new(backend)), 1);
        let (metadata, restored) = restarted.restore_latest().await.unwrap().unwrap();
        assert_eq!(metadata.checkpoint_id, 1);
        assert_eq!(restored, snapshot(1));
    }

    #[tokio::test]
    async fn test_restore_numbers_new_checkpoints_after_latest() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        store.write(&Checkpoint::new(5, &snapshot(5)).unwrap()).await.unwrap();

        let mut coordinator = CheckpointCoordinator::new(store, 2);
        coordinator.restore_latest().await.unwrap();

        assert_eq!(coordinator.begin(snapshot(6), None).unwrap(), 6);
        coordinator.wait_in_flight().await;
    }

    #[tokio::test]
    async fn test_corrupt_latest_fails_restore() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        store.write(&Checkpoint::new(1, &snapshot(1)).unwrap()).await.unwrap();
        tokio::fs::write(store.path_for(2), b"garbage").await.unwrap();

        let mut coordinator = CheckpointCoordinator::new(store, 1);
        assert!(coordinator.restore_latest().await.is_err());
        assert_eq!(coordinator.stats().await.restore_failures, 1);

        // A fresh start must not reuse the corrupt id
        assert_eq!(coordinator.begin(snapshot(3), None).unwrap(), 3);
        coordinator.wait_in_flight().await;
    }

    /// Emitter holding one undelivered alert behind a paused sink
    async fn stalled_emitter(sink: &CollectingSink) -> OutputEmitter {
        sink.set_paused(true);
        let mut emitter = OutputEmitter::new(
            Arc::new(sink.clone()),
            Arc::new(sink.clone()),
            &crate::config::SinkConfig::default(),
            crate::metrics::EngineMetrics::new(),
        );
        emitter
            .emit(EngineOutput::Alert(analytics_types::AlertRecord {
                alert_id: "a".to_string(),
                timestamp: 0,
                alert_type: "HIGH_BOUNCE_RATE".to_string(),
                severity: analytics_types::Severity::Medium,
                title: String::new(),
                description: String::new(),
                pattern_matched: String::new(),
                affected_keys: vec![],
                evidence: BTreeMap::new(),
                evidence_count: 1,
                context: BTreeMap::new(),
                window_start: 0,
                window_end: 1,
                recommended_action: String::new(),
                source: analytics_types::ALERT_SOURCE.to_string(),
            }))
            .await
            .unwrap();
        emitter
    }

    #[tokio::test]
    async fn test_checkpoint_waits_for_output_barrier() {
        let sink = CollectingSink::new();
        let emitter = stalled_emitter(&sink).await;

        let dir = TempDir::new().unwrap();
        let mut coordinator = CheckpointCoordinator::new(Arc::new(FileCheckpointStore::new(dir.path())), 1);
        coordinator.begin(snapshot(1), Some(emitter.barrier())).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(coordinator.poll_completed().is_none());

        sink.set_paused(false);
        assert!(matches!(
            coordinator.wait_in_flight().await,
            Some(CheckpointOutcome::Completed { .. })
        ));
        assert_eq!(sink.alerts().len(), 1);
        emitter.close(std::time::Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_in_flight_checkpoint() {
        let sink = CollectingSink::new();
        let emitter = stalled_emitter(&sink).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        let mut coordinator = CheckpointCoordinator::new(store.clone(), 1);
        let id = coordinator.begin(snapshot(1), Some(emitter.barrier())).unwrap();

        // A dropped wait leaves the checkpoint in flight
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            coordinator.wait_in_flight(),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(coordinator.in_flight(), Some(id));

        match coordinator.abort_in_flight() {
            Some(CheckpointOutcome::Failed { checkpoint_id, .. }) => assert_eq!(checkpoint_id, id),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(coordinator.in_flight(), None);
        assert!(coordinator.abort_in_flight().is_none());

        sink.set_paused(false);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(store.latest_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sync_directory() {
        let dir = TempDir::new().unwrap();
        sync_directory(dir.path()).await.unwrap();

        #[cfg(unix)]
        assert!(sync_directory(&dir.path().join("missing")).await.is_err());
    }
}
