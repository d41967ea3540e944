//! In-memory state backend implementation
//!
//! This module provides an in-memory state backend using DashMap for
//! concurrent access. It backs tests and single-process deployments that keep
//! checkpoints in memory, and clones share the same underlying map.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::StateBackend;
use crate::error::StateResult;

/// Statistics about the memory state backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryBackendStats {
    /// Number of get operations
    pub get_count: u64,
    /// Number of put operations
    pub put_count: u64,
    /// Number of delete operations
    pub delete_count: u64,
    /// Number of gets that found a value
    pub hit_count: u64,
    /// Number of gets that found nothing
    pub miss_count: u64,
}

/// In-memory state backend using DashMap
///
/// ## Example
///
/// ```rust,no_run
/// use processor::state::{MemoryStateBackend, StateBackend};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let backend = MemoryStateBackend::new();
///
///     backend.put(b"checkpoint/00000000000000000001", b"blob").await?;
///
///     if let Some(data) = backend.get(b"checkpoint/00000000000000000001").await? {
///         println!("Checkpoint blob: {} bytes", data.len());
///     }
///
///     let stats = backend.stats();
///     println!("Puts: {}", stats.put_count);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStateBackend {
    /// The actual state storage
    data: Arc<DashMap<Vec<u8>, Vec<u8>>>,
    /// Statistics tracking
    stats: Arc<Mutex<MemoryBackendStats>>,
}

impl MemoryStateBackend {
    /// Create a new, empty in-memory state backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current statistics
    pub fn stats(&self) -> MemoryBackendStats {
        self.stats.lock().clone()
    }

    /// Get total memory usage of keys and values in bytes (approximate)
    pub fn memory_usage(&self) -> usize {
        self.data
            .iter()
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn get(&self, key: &[u8]) -> StateResult<Option<Vec<u8>>> {
        trace!("Getting key: {:?}", String::from_utf8_lossy(key));

        let result = self.data.get(key).map(|entry| entry.value().clone());

        let mut stats = self.stats.lock();
        stats.get_count += 1;
        if result.is_some() {
            stats.hit_count += 1;
        } else {
            stats.miss_count += 1;
        }

        Ok(result)
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StateResult<()> {
        trace!(
            "Putting key: {:?}, value size: {} bytes",
            String::from_utf8_lossy(key),
            value.len()
        );

        self.data.insert(key.to_vec(), value.to_vec());
        self.stats.lock().put_count += 1;

        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StateResult<()> {
        trace!("Deleting key: {:?}", String::from_utf8_lossy(key));

        self.data.remove(key);
        self.stats.lock().delete_count += 1;

        Ok(())
    }

    async fn list_keys(&self, prefix: &[u8]) -> StateResult<Vec<Vec<u8>>> {
        let keys = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();

        Ok(keys)
    }

    async fn clear(&self) -> StateResult<()> {
        debug!("Clearing all state");
        self.data.clear();
        Ok(())
    }

    async fn count(&self) -> StateResult<usize> {
        Ok(self.data.len())
    }

    async fn contains(&self, key: &[u8]) -> StateResult<bool> {
        Ok(self.data.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::backend::tests::*;

    #[tokio::test]
    async fn test_memory_backend_basic() {
        test_backend_basic_ops(MemoryStateBackend::new()).await;
    }

    #[tokio::test]
    async fn test_memory_backend_list_keys() {
        test_backend_list_keys(MemoryStateBackend::new()).await;
    }

    #[tokio::test]
    async fn test_memory_backend_clear() {
        test_backend_clear(MemoryStateBackend::new()).await;
    }

    #[tokio::test]
    async fn test_memory_backend_contains() {
        test_backend_contains(MemoryStateBackend::new()).await;
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let backend = MemoryStateBackend::new();
        let clone = backend.clone();

        backend.put(b"key", b"value").await.unwrap();
        assert_eq!(clone.get(b"key").await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn test_stats() {
        let backend = MemoryStateBackend::new();

        backend.put(b"key1", b"value1").await.unwrap();
        backend.put(b"key2", b"value2").await.unwrap();

        backend.get(b"key1").await.unwrap(); // Hit
        backend.get(b"key1").await.unwrap(); // Hit
        backend.get(b"nonexistent").await.unwrap(); // Miss

        backend.delete(b"key1").await.unwrap();

        let stats = backend.stats();
        assert_eq!(stats.put_count, 2);
        assert_eq!(stats.get_count, 3);
        assert_eq!(stats.delete_count, 1);
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 1);
    }

    #[tokio::test]
    async fn test_memory_usage() {
        let backend = MemoryStateBackend::new();
        assert_eq!(backend.memory_usage(), 0);

        backend.put(b"key1", b"value1").await.unwrap();
        assert_eq!(backend.memory_usage(), 10);

        backend.delete(b"key1").await.unwrap();
        assert_eq!(backend.memory_usage(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let backend = Arc::new(MemoryStateBackend::new());
        let mut handles = vec![];

        for i in 0..10 {
            let backend = Arc::clone(&backend);
            let handle = tokio::spawn(async move {
                for j in 0..10 {
                    let key = format!("key:{}:{}", i, j).into_bytes();
                    let value = format!("value:{}:{}", i, j).into_bytes();
                    backend.put(&key, &value).await.unwrap();
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(backend.count().await.unwrap(), 100);
    }
}
