//! LMDB-backed cache backend.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that survives process restarts and can be shared by
//! several processes on one host.
//!
//! # Value Layout
//!
//! Each value is stored as `[expires_at: 8 bytes][payload]`, where
//! `expires_at` is Unix milliseconds (little-endian `i64`) and `0` means the
//! entry never expires. Expired entries are treated as absent and removed
//! lazily on read, or in bulk by [`LmdbCacheBackend::purge_expired`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get`
//! - Write transactions for `set`, `delete`, `delete_many` and purges
//! - Lazy expiry deletes re-check the header in their write transaction
//! - Statistics behind a lock, updated after each operation

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use memoir_core::{BackendError, Clock, Expiry, MemoirError, MemoirResult, SystemClock, Timestamp};

use super::traits::{CacheBackend, CacheStats};

/// Size of the expiry header in front of every value.
const HEADER_LEN: usize = 8;

/// Header value meaning "never expires".
const NEVER_EXPIRES: i64 = 0;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Corrupt value for key {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbCacheError to MemoirError.
impl From<LmdbCacheError> for MemoirError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Corrupt(key) => MemoirError::Backend(BackendError::Deserialization {
                key,
                reason: "value shorter than expiry header".to_string(),
            }),
            other => MemoirError::Backend(BackendError::TransactionFailed {
                reason: other.to_string(),
            }),
        }
    }
}

/// LMDB-backed cache backend.
///
/// # Example
///
/// ```ignore
/// use memoir_storage::cache::LmdbCacheBackend;
///
/// let backend = Arc::new(LmdbCacheBackend::new("/var/cache/memoir", 100)?);
/// let cache = MethodCache::new(backend, MethodCacheConfig::default())?;
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Time source for expiry.
    clock: Arc<dyn Clock>,
    /// Hit/miss/expiration counters.
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        Self::with_clock(path, max_size_mb, Arc::new(SystemClock))
    }

    /// Create a backend whose expiry decisions use `clock`.
    pub fn with_clock<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the memory map is not modified outside LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            clock,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    /// Remove every expired entry. Returns how many were removed.
    ///
    /// Scans and deletes inside one write transaction, so an entry rewritten
    /// concurrently is seen with its new header and kept.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now_ms = self.clock.now().timestamp_millis();
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let expired = {
            let iter = self
                .db
                .iter(&wtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            let mut expired = Vec::new();
            for result in iter {
                let (key, value) =
                    result.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
                if is_expired(read_expiry(value), now_ms) {
                    expired.push(key.to_vec());
                }
            }
            expired
        };

        let mut purged = 0u64;
        for key in &expired {
            let deleted = self
                .db
                .delete(&mut wtxn, key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            if deleted {
                purged += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.record(|s| s.expirations += purged);
        Ok(purged)
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    fn expires_at_millis(&self, expiry: Expiry) -> i64 {
        let expires_at: Option<Timestamp> = expiry
            .duration()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| self.clock.now().checked_add_signed(d));
        // A computed instant of exactly 0 would read back as "never"; nudge it.
        expires_at.map_or(NEVER_EXPIRES, |at| at.timestamp_millis().max(1))
    }

    /// Delete `key` if it is still expired at `now_ms`. Returns whether it
    /// was deleted.
    ///
    /// The header is re-read inside the write transaction: a `set` that
    /// landed after the caller's read must survive.
    fn remove_expired_key(&self, key: &[u8], now_ms: i64) -> Result<bool, LmdbCacheError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let still_expired = match self.db.get(&wtxn, key) {
            Ok(Some(value)) => is_expired(read_expiry(value), now_ms),
            Ok(None) => false,
            Err(e) => return Err(LmdbCacheError::Transaction(e.to_string())),
        };

        let deleted = if still_expired {
            self.db
                .delete(&mut wtxn, key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
        } else {
            false
        };

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(deleted)
    }
}

fn read_expiry(value: &[u8]) -> Option<i64> {
    let header: [u8; HEADER_LEN] = value.get(..HEADER_LEN)?.try_into().ok()?;
    Some(i64::from_le_bytes(header))
}

fn is_expired(expires_at: Option<i64>, now_ms: i64) -> bool {
    match expires_at {
        Some(NEVER_EXPIRES) => false,
        Some(at) => at <= now_ms,
        // Unreadable header: treat as gone.
        None => true,
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &str) -> MemoirResult<Option<Vec<u8>>> {
        let now_ms = self.clock.now().timestamp_millis();

        let found = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            match self.db.get(&rtxn, key.as_bytes()) {
                Ok(Some(bytes)) => {
                    if bytes.len() < HEADER_LEN {
                        return Err(LmdbCacheError::Corrupt(key.to_string()).into());
                    }
                    Some((read_expiry(bytes), bytes[HEADER_LEN..].to_vec()))
                }
                Ok(None) => None,
                Err(e) => {
                    self.record(|s| s.misses += 1);
                    return Err(LmdbCacheError::Transaction(e.to_string()).into());
                }
            }
        };

        match found {
            Some((expires_at, _)) if is_expired(expires_at, now_ms) => {
                let removed = self.remove_expired_key(key.as_bytes(), now_ms)?;
                self.record(|s| {
                    s.misses += 1;
                    if removed {
                        s.expirations += 1;
                    }
                });
                Ok(None)
            }
            Some((_, payload)) => {
                self.record(|s| s.hits += 1);
                Ok(Some(payload))
            }
            None => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, expiry: Expiry) -> MemoirResult<()> {
        let mut full_bytes = Vec::with_capacity(HEADER_LEN + value.len());
        full_bytes.extend_from_slice(&self.expires_at_millis(expiry).to_le_bytes());
        full_bytes.extend_from_slice(&value);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, key.as_bytes(), &full_bytes)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> MemoirResult<bool> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    async fn delete_many(&self, keys: &[String]) -> MemoirResult<u64> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in keys {
            let existed = self
                .db
                .delete(&mut wtxn, key.as_bytes())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            if existed {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    async fn stats(&self) -> MemoirResult<CacheStats> {
        let (entry_count, memory_bytes) = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            let mut count = 0u64;
            let mut bytes = 0u64;
            for (_, value) in iter.flatten() {
                count += 1;
                bytes += value.len().saturating_sub(HEADER_LEN) as u64;
            }
            (count, bytes)
        };

        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = entry_count;
        stats.memory_bytes = memory_bytes;
        Ok(stats)
    }
}
