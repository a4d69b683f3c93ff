//! Cache orchestrator: read path, write path and invalidation.
//!
//! # Read path
//!
//! 1. Unsaved entities are never cached; the computation runs every time.
//! 2. The instance-local tier of the entity object.
//! 3. The shared backend, only when the method's TTL enables it. A hit is
//!    mirrored into the instance-local tier.
//! 4. On a full miss the computation runs. With backend caching enabled the
//!    method key is registered under the master key and the result is stored.
//!    The result is always mirrored into the instance-local tier.
//!
//! # Invalidation
//!
//! The master key's [`KeyRegistry`] lists every method key stored for the
//! entity. Invalidation deletes those keys in one call and then the master
//! key itself. The registry is written before the entry it lists, so an
//! entry in the backend is always reachable from its registry.
//!
//! Backend failures on the read and write paths are logged and treated as
//! misses. They never fail the caller.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memoir_core::{
    BackendError, CacheTtl, CallArgs, Clock, Expiry, KeyDeriver, KeyError, MasterKey,
    MemoirResult, MethodCacheConfig, MethodKey, SystemClock, Timestamp,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::entity::{CacheableEntity, EntityRef};
use super::hook::{InvalidationHook, SaveSignal, Subscription};
use super::registry::KeyRegistry;
use super::traits::{CacheBackend, CacheStats};

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    local_hits: AtomicU64,
    backend_hits: AtomicU64,
    misses: AtomicU64,
    uncached: AtomicU64,
    backend_errors: AtomicU64,
    invalidations: AtomicU64,
    invalidation_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of orchestrator activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodCacheStats {
    /// Served from an entity's instance-local tier.
    pub local_hits: u64,
    /// Served from the shared backend.
    pub backend_hits: u64,
    /// Computed because no tier held the result.
    pub misses: u64,
    /// Computed without caching because the entity has no identity.
    pub uncached: u64,
    /// Backend calls that failed or returned undecodable data.
    pub backend_errors: u64,
    /// Completed invalidations.
    pub invalidations: u64,
    /// Invalidations that failed part way.
    pub invalidation_failures: u64,
}

impl MethodCacheStats {
    /// Fraction of cacheable calls served without computing (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.local_hits + self.backend_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

// ============================================================================
// METHOD CACHE
// ============================================================================

/// Memoizes entity method results across an instance-local tier and a
/// shared backend.
///
/// # Example
///
/// ```ignore
/// let cache = MethodCache::new(Arc::new(InMemoryCacheBackend::new()), config)?;
/// let _subscription = cache.attach(store.signal());
///
/// let args = CallArgs::new().arg(&3)?;
/// let total = cache
///     .get(&order, "total", CacheTtl::from_secs(60), &args, || order.compute_total(3))
///     .await;
/// ```
pub struct MethodCache<B: CacheBackend> {
    backend: Arc<B>,
    keys: KeyDeriver,
    config: MethodCacheConfig,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
}

impl<B: CacheBackend + 'static> MethodCache<B> {
    /// Create an orchestrator over `backend`. Fails if `config` is invalid.
    pub fn new(backend: Arc<B>, config: MethodCacheConfig) -> MemoirResult<Self> {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    /// Create an orchestrator with the default configuration.
    pub fn with_defaults(backend: Arc<B>) -> Self {
        Self::build(backend, MethodCacheConfig::default(), Arc::new(SystemClock))
    }

    /// Create an orchestrator whose registry expiry is computed against `clock`.
    ///
    /// Share the clock with the backend when simulating time.
    pub fn with_clock(
        backend: Arc<B>,
        config: MethodCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> MemoirResult<Self> {
        config.validate()?;
        Ok(Self::build(backend, config, clock))
    }

    fn build(backend: Arc<B>, config: MethodCacheConfig, clock: Arc<dyn Clock>) -> Self {
        let keys = match &config.key_prefix {
            Some(prefix) => KeyDeriver::with_prefix(prefix.clone()),
            None => KeyDeriver::new(),
        };
        Self {
            backend,
            keys,
            config,
            clock,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MethodCacheConfig {
        &self.config
    }

    /// Get a reference to the cache backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Get the key deriver.
    pub fn keys(&self) -> &KeyDeriver {
        &self.keys
    }

    /// Return the cached result of `method` on `entity`, computing it on a miss.
    pub async fn get<E, R, F>(
        &self,
        entity: &E,
        method: &str,
        ttl: CacheTtl,
        args: &CallArgs,
        compute: F,
    ) -> R
    where
        E: CacheableEntity,
        R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> R,
    {
        let result = self
            .try_get(entity, method, ttl, args, || Ok::<R, Infallible>(compute()))
            .await;
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`MethodCache::get`] for a fallible computation.
    ///
    /// An `Err` from `compute` is returned as is and never cached.
    pub async fn try_get<E, R, Er, F>(
        &self,
        entity: &E,
        method: &str,
        ttl: CacheTtl,
        args: &CallArgs,
        compute: F,
    ) -> Result<R, Er>
    where
        E: CacheableEntity,
        R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<R, Er>,
    {
        let (master, key) = match self.derive_keys(entity, method, args) {
            Ok(keys) => keys,
            Err(KeyError::Unidentified { .. }) => {
                Counters::bump(&self.counters.uncached);
                debug!(
                    entity_type = E::entity_type(),
                    method, "entity has no identity; computing uncached"
                );
                return compute();
            }
            Err(e) => {
                Counters::bump(&self.counters.uncached);
                warn!(
                    entity_type = E::entity_type(),
                    method,
                    error = %e,
                    "arguments cannot be keyed; computing uncached"
                );
                return compute();
            }
        };

        let local = entity.instance_cache();
        if let Some(value) = local.get::<R>(&key) {
            Counters::bump(&self.counters.local_hits);
            debug!(method, key = %key, "instance cache hit");
            return Ok(value);
        }

        if ttl.is_enabled() {
            if let Some(value) = self.read_backend::<R>(method, &key).await {
                local.insert(key, value.clone());
                return Ok(value);
            }
        }

        Counters::bump(&self.counters.misses);
        debug!(method, key = %key, ttl = %ttl, "cache miss");
        let value = compute()?;

        if let Some(expiry) = ttl.expiry() {
            if let Err(e) = self.store(&master, &key, &value, expiry).await {
                Counters::bump(&self.counters.backend_errors);
                warn!(method, key = %key, error = %e, "failed to store result in backend");
            }
        }

        local.insert(key, value.clone());
        Ok(value)
    }

    /// Purge every cached result of the referenced entity from the backend.
    ///
    /// Returns `Ok(false)` when the entity has no identity (nothing can have
    /// been cached for it) and `Ok(true)` once the purge completed.
    pub async fn invalidate(&self, entity: &EntityRef) -> MemoirResult<bool> {
        let master = match self.keys.master_key(&entity.entity_type, entity.entity_id) {
            Ok(master) => master,
            Err(KeyError::Unidentified { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        match self.purge(&master).await {
            Ok(purged) => {
                Counters::bump(&self.counters.invalidations);
                debug!(
                    entity_type = %entity.entity_type,
                    master = %master,
                    purged,
                    "invalidated cached method results"
                );
                Ok(true)
            }
            Err(e) => {
                Counters::bump(&self.counters.invalidation_failures);
                Err(e)
            }
        }
    }

    /// Invalidate `entity` in the backend and clear its own instance-local tier.
    pub async fn invalidate_instance<E: CacheableEntity>(&self, entity: &E) -> MemoirResult<bool> {
        entity.instance_cache().clear();
        self.invalidate(&entity.entity_ref()).await
    }

    /// Connect an invalidation observer to a persistence layer's save signal.
    ///
    /// Dropping the returned subscription disconnects it.
    pub fn attach(&self, signal: &SaveSignal) -> Subscription {
        signal.connect(Arc::new(InvalidationHook::new(self.clone())))
    }

    /// Snapshot of orchestrator counters.
    pub fn stats(&self) -> MethodCacheStats {
        let c = &self.counters;
        MethodCacheStats {
            local_hits: c.local_hits.load(Ordering::Relaxed),
            backend_hits: c.backend_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            uncached: c.uncached.load(Ordering::Relaxed),
            backend_errors: c.backend_errors.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            invalidation_failures: c.invalidation_failures.load(Ordering::Relaxed),
        }
    }

    /// Statistics reported by the backend itself.
    pub async fn backend_stats(&self) -> MemoirResult<CacheStats> {
        self.backend.stats().await
    }

    fn derive_keys<E: CacheableEntity>(
        &self,
        entity: &E,
        method: &str,
        args: &CallArgs,
    ) -> Result<(MasterKey, MethodKey), KeyError> {
        let master = self.keys.master_key(E::entity_type(), entity.entity_id())?;
        let marker = if self.config.track_last_modified {
            entity.last_modified()
        } else {
            None
        };
        let key = self.keys.method_key(&master, method, args, marker)?;
        Ok((master, key))
    }

    async fn read_backend<R: DeserializeOwned>(&self, method: &str, key: &MethodKey) -> Option<R> {
        let bytes = match self.backend.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                Counters::bump(&self.counters.backend_errors);
                warn!(method, key = %key, error = %e, "backend read failed; treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                Counters::bump(&self.counters.backend_hits);
                debug!(method, key = %key, "backend hit");
                Some(value)
            }
            Err(e) => {
                Counters::bump(&self.counters.backend_errors);
                warn!(method, key = %key, error = %e, "cached value undecodable; treating as miss");
                None
            }
        }
    }

    async fn store<R: Serialize>(
        &self,
        master: &MasterKey,
        key: &MethodKey,
        value: &R,
        expiry: Expiry,
    ) -> MemoirResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| BackendError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let now = self.clock.now();
        let expires_at = expiry
            .duration()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| now.checked_add_signed(d));

        // Registry first: an entry must never exist without being listed.
        self.register(master, key, expires_at, now).await?;
        self.backend.set(key.as_str(), bytes, expiry).await
    }

    async fn register(
        &self,
        master: &MasterKey,
        key: &MethodKey,
        expires_at: Option<Timestamp>,
        now: Timestamp,
    ) -> MemoirResult<()> {
        let mut registry = match self.backend.get(master.as_str()).await? {
            Some(bytes) => KeyRegistry::decode(master.as_str(), &bytes)?,
            None => KeyRegistry::new(),
        };

        registry.register(key.clone(), expires_at, now);
        let expiry = registry.expiry(now, self.config.registry_ttl_multiplier);
        let bytes = registry.encode(master.as_str())?;
        self.backend.set(master.as_str(), bytes, expiry).await
    }

    async fn purge(&self, master: &MasterKey) -> MemoirResult<u64> {
        let decoded = match self.backend.get(master.as_str()).await? {
            Some(bytes) => KeyRegistry::decode(master.as_str(), &bytes),
            None => Ok(KeyRegistry::new()),
        };

        let registry = match decoded {
            Ok(registry) => registry,
            Err(e) => {
                // Unreadable list: drop it so later registrations start clean.
                self.backend.delete(master.as_str()).await?;
                return Err(e);
            }
        };

        let keys: Vec<String> = registry.keys().map(|k| k.as_str().to_string()).collect();
        let purged = if keys.is_empty() {
            0
        } else {
            self.backend.delete_many(&keys).await?
        };

        self.backend.delete(master.as_str()).await?;
        Ok(purged)
    }
}

impl<B: CacheBackend> Clone for MethodCache<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            keys: self.keys.clone(),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            counters: Arc::clone(&self.counters),
        }
    }
}
