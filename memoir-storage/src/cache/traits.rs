//! Cache backend trait.
//!
//! This module defines the contract a shared cache backend must satisfy.

use async_trait::async_trait;
use memoir_core::{Expiry, MemoirResult};

/// Shared cache backend.
///
/// Abstracts over key-value stores with per-entry expiry (LMDB, Redis,
/// memcached, in-memory). Every individual call is assumed atomic; the
/// caller performs no cross-call locking.
///
/// # Presence
///
/// `get` distinguishes "absent" (`None`) from any stored value, including an
/// empty one, so results that serialize to `null` or `[]` are real hits.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get the stored bytes for a key, or `None` if absent or expired.
    async fn get(&self, key: &str) -> MemoirResult<Option<Vec<u8>>>;

    /// Store bytes under a key with the given expiry, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> MemoirResult<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> MemoirResult<bool>;

    /// Delete several keys. Returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> MemoirResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> MemoirResult<CacheStats>;
}

/// Statistics about backend usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate payload size in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because they expired.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
