//! Memoir Storage - Method Cache and Backends
//!
//! Builds the caching algorithm on the keys and types from `memoir-core`:
//! cache backends (in-memory and LMDB), the instance-local tier, the
//! orchestrator and the save hook that keeps cached results fresh.

pub mod cache;

// Re-export cache types for callers wiring up a persistence layer
pub use cache::{
    CacheBackend, CacheStats, CacheableEntity, CachedMethod, EntityRef, InMemoryCacheBackend,
    InstanceCache, InvalidationHook, KeyRegistry, LmdbCacheBackend, LmdbCacheError, MethodCache,
    MethodCacheStats, RegisteredKey, SaveObserver, SaveSignal, Subscription,
};

pub use memoir_core::{
    CacheTtl, CallArgs, EntityId, Expiry, MemoirError, MemoirResult, MethodCacheConfig, Timestamp,
};
