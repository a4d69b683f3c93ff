//! In-memory cache backend.
//!
//! A process-local stand-in for a shared key-value store. Expiry is checked
//! lazily against an injected [`Clock`], so tests can simulate the passage of
//! time. The backend can also be switched into an "unavailable" mode where
//! every call fails, to exercise the orchestrator's degraded paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use memoir_core::{BackendError, Clock, Expiry, MemoirResult, SystemClock, Timestamp};

use super::traits::{CacheBackend, CacheStats};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Timestamp>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory cache backend.
///
/// Uses tokio::sync::RwLock for safe async access.
pub struct InMemoryCacheBackend {
    entries: tokio::sync::RwLock<HashMap<String, MemoryEntry>>,
    clock: Arc<dyn Clock>,
    stats: RwLock<CacheStats>,
    unavailable: AtomicBool,
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryCacheBackend {
    /// Create a backend using wall-clock time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend whose expiry decisions use `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: tokio::sync::RwLock::new(HashMap::new()),
            clock,
            stats: RwLock::new(CacheStats::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail (`true`) or succeed again (`false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Keys that are present and not expired, sorted.
    pub async fn live_keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Whether a live entry exists for `key`, without touching statistics.
    pub async fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Remove every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> MemoirResult<u64> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let purged = (before - entries.len()) as u64;
        drop(entries);

        self.record(|s| s.expirations += purged);
        Ok(purged)
    }

    fn check_available(&self) -> MemoirResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable {
                reason: "in-memory backend switched off".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn expires_at(&self, expiry: Expiry) -> Option<Timestamp> {
        let duration = expiry.duration()?;
        let delta = chrono::Duration::from_std(duration).ok()?;
        self.clock.now().checked_add_signed(delta)
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> MemoirResult<Option<Vec<u8>>> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        let found = entries
            .get(key)
            .map(|entry| (entry.is_expired(now), entry.value.clone()));

        match found {
            Some((true, _)) => {
                entries.remove(key);
                self.record(|s| {
                    s.misses += 1;
                    s.expirations += 1;
                });
                Ok(None)
            }
            Some((false, value)) => {
                self.record(|s| s.hits += 1);
                Ok(Some(value))
            }
            None => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> MemoirResult<()> {
        self.check_available()?;
        let entry = MemoryEntry {
            value,
            expires_at: self.expires_at(expiry),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> MemoirResult<bool> {
        self.check_available()?;
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_many(&self, keys: &[String]) -> MemoirResult<u64> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        let deleted = keys
            .iter()
            .filter(|key| entries.remove(key.as_str()).is_some())
            .count();
        Ok(deleted as u64)
    }

    async fn stats(&self) -> MemoirResult<CacheStats> {
        self.check_available()?;
        let entries = self.entries.read().await;
        let mut stats = self
            .stats
            .read()
            .map(|stats| stats.clone())
            .map_err(|_| BackendError::LockPoisoned)?;
        stats.entry_count = entries.len() as u64;
        stats.memory_bytes = entries.values().map(|e| e.value.len() as u64).sum();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoir_core::ManualClock;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = InMemoryCacheBackend::new();

        backend.set("a", b"1".to_vec(), Expiry::Never).await.unwrap();
        assert_eq!(backend.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(backend.get("b").await.unwrap(), None);

        assert!(backend.delete("a").await.unwrap());
        assert!(!backend.delete("a").await.unwrap());
        assert_eq!(backend.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_value_is_present() {
        let backend = InMemoryCacheBackend::new();
        backend.set("empty", Vec::new(), Expiry::Never).await.unwrap();
        assert_eq!(backend.get("empty").await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_expiry_follows_clock() {
        let clock = Arc::new(ManualClock::starting_now());
        let backend = InMemoryCacheBackend::with_clock(clock.clone());

        backend
            .set("short", b"x".to_vec(), Expiry::After(Duration::from_secs(60)))
            .await
            .unwrap();
        backend.set("forever", b"y".to_vec(), Expiry::Never).await.unwrap();

        clock.advance(Duration::from_secs(59));
        assert!(backend.get("short").await.unwrap().is_some());

        clock.advance(Duration::from_secs(2));
        assert!(backend.get("short").await.unwrap().is_none());
        assert!(backend.get("forever").await.unwrap().is_some());

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_purge_expired_drops_unread_entries() {
        let clock = Arc::new(ManualClock::starting_now());
        let backend = InMemoryCacheBackend::with_clock(clock.clone());

        for i in 0..3u8 {
            backend
                .set(&format!("short-{i}"), vec![i], Expiry::After(Duration::from_secs(10)))
                .await
                .unwrap();
        }
        backend.set("keep", b"k".to_vec(), Expiry::Never).await.unwrap();

        clock.advance(Duration::from_secs(11));
        assert_eq!(backend.purge_expired().await.unwrap(), 3);
        assert_eq!(backend.purge_expired().await.unwrap(), 0);

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.expirations, 3);
    }

    #[tokio::test]
    async fn test_delete_many_counts_existing() {
        let backend = InMemoryCacheBackend::new();
        backend.set("a", b"1".to_vec(), Expiry::Never).await.unwrap();
        backend.set("b", b"2".to_vec(), Expiry::Never).await.unwrap();

        let deleted = backend
            .delete_many(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(backend.live_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_every_call() {
        let backend = InMemoryCacheBackend::new();
        backend.set_unavailable(true);

        assert!(backend.get("a").await.is_err());
        assert!(backend.set("a", vec![], Expiry::Never).await.is_err());
        assert!(backend.delete("a").await.is_err());
        assert!(backend.delete_many(&[]).await.is_err());

        backend.set_unavailable(false);
        assert!(backend.get("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_stats_hits_and_misses() {
        let backend = InMemoryCacheBackend::new();
        backend.set("a", b"abc".to_vec(), Expiry::Never).await.unwrap();
        backend.get("a").await.unwrap();
        backend.get("missing").await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.memory_bytes, 3);
    }
}
