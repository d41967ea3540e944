//! State backend trait definition
//!
//! This module defines the core `StateBackend` trait that byte-oriented state
//! stores implement. The trait provides a simple key-value interface with
//! support for listing keys by prefix. Checkpoints can be persisted into any
//! backend through [`super::BackendCheckpointStore`].

use async_trait::async_trait;

use crate::error::StateResult;

/// Core trait for state backend implementations
///
/// ## Key Design Principles
///
/// - **Byte-oriented**: Keys and values are byte slices
/// - **Async-first**: All operations return futures for non-blocking I/O
/// - **Simple interface**: CRUD operations plus prefix listing
///
/// ## Implementation Requirements
///
/// - **Thread safety**: Concurrent access from multiple tasks
/// - **Atomicity**: Individual operations are atomic
///
/// ## Example
///
/// ```rust,no_run
/// # use processor::state::{StateBackend, MemoryStateBackend};
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let backend = MemoryStateBackend::new();
/// backend.put(b"checkpoint/latest", b"00000000000000000007").await?;
///
/// match backend.get(b"checkpoint/latest").await? {
///     Some(value) => println!("Found: {:?}", value),
///     None => println!("Not found"),
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Retrieve a value for the given key
    ///
    /// Returns `Ok(None)` if the key does not exist.
    async fn get(&self, key: &[u8]) -> StateResult<Option<Vec<u8>>>;

    /// Store a value for the given key, overwriting any previous value
    async fn put(&self, key: &[u8], value: &[u8]) -> StateResult<()>;

    /// Delete a key and its associated value
    ///
    /// This operation is idempotent - deleting a non-existent key is not an error.
    async fn delete(&self, key: &[u8]) -> StateResult<()>;

    /// List all keys with the given prefix
    ///
    /// An empty prefix matches all keys.
    async fn list_keys(&self, prefix: &[u8]) -> StateResult<Vec<Vec<u8>>>;

    /// Clear all state from the backend
    async fn clear(&self) -> StateResult<()> {
        let keys = self.list_keys(b"").await?;
        for key in keys {
            self.delete(&key).await?;
        }
        Ok(())
    }

    /// Get the number of keys in the backend
    async fn count(&self) -> StateResult<usize> {
        Ok(self.list_keys(b"").await?.len())
    }

    /// Check if a key exists
    async fn contains(&self, key: &[u8]) -> StateResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
