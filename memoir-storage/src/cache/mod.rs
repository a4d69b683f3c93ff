//! Per-entity method-result cache with mutation-driven invalidation.
//!
//! Results are cached in two tiers: an [`InstanceCache`] owned by each
//! in-memory entity object, and a shared [`CacheBackend`] visible to every
//! copy of the entity. Each entity's master key holds a [`KeyRegistry`] of
//! the method keys stored for it, so a save can purge exactly those keys
//! without scanning the backend.
//!
//! # Example
//!
//! ```ignore
//! let backend = Arc::new(LmdbCacheBackend::new("/var/cache/memoir", 100)?);
//! let cache = MethodCache::new(backend, MethodCacheConfig::from_env())?;
//!
//! // Invalidate on every save for as long as `_subscription` lives
//! let _subscription = cache.attach(store.signal());
//!
//! let score = CachedMethod::new("score", CacheTtl::from_secs(60), |doc: &Document, _| {
//!     doc.expensive_score()
//! });
//! let value = score.call_no_args(&cache, &doc).await;
//! ```

pub mod cached_method;
pub mod entity;
pub mod hook;
pub mod lmdb_backend;
pub mod local;
pub mod memory_backend;
pub mod method_cache;
pub mod registry;
pub mod traits;

pub use cached_method::CachedMethod;
pub use entity::{CacheableEntity, EntityRef};
pub use hook::{InvalidationHook, SaveObserver, SaveSignal, Subscription};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use local::InstanceCache;
pub use memory_backend::InMemoryCacheBackend;
pub use method_cache::{MethodCache, MethodCacheStats};
pub use registry::{KeyRegistry, RegisteredKey};
pub use traits::{CacheBackend, CacheStats};
