//! Memoized entity methods.
//!
//! A [`CachedMethod`] pairs a computation with its name and TTL policy, so
//! call sites only supply the entity and its arguments.

use std::fmt;
use std::sync::Arc;

use memoir_core::{CacheTtl, CallArgs};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::entity::CacheableEntity;
use super::method_cache::MethodCache;
use super::traits::CacheBackend;

type Compute<E, R> = Arc<dyn Fn(&E, &CallArgs) -> R + Send + Sync>;

/// A per-entity computation with caching attached.
///
/// # Example
///
/// ```ignore
/// let total = CachedMethod::new("total", CacheTtl::from_secs(300), |order: &Order, args| {
///     order.compute_total(args)
/// });
///
/// let value = total.call(&cache, &order, &CallArgs::new().arg(&"EUR")?).await;
/// ```
pub struct CachedMethod<E, R> {
    name: String,
    /// `None` uses the cache's configured default.
    ttl: Option<CacheTtl>,
    compute: Compute<E, R>,
}

impl<E, R> CachedMethod<E, R>
where
    E: CacheableEntity,
    R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Wrap `compute` under `name` with an explicit TTL.
    pub fn new<F>(name: impl Into<String>, ttl: CacheTtl, compute: F) -> Self
    where
        F: Fn(&E, &CallArgs) -> R + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            ttl: Some(ttl),
            compute: Arc::new(compute),
        }
    }

    /// Wrap `compute` under `name`, using `MethodCacheConfig::default_ttl`.
    pub fn with_default_ttl<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&E, &CallArgs) -> R + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            ttl: None,
            compute: Arc::new(compute),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The TTL this method uses with `cache`.
    pub fn ttl<B: CacheBackend + 'static>(&self, cache: &MethodCache<B>) -> CacheTtl {
        self.ttl.unwrap_or(cache.config().default_ttl)
    }

    /// Call through the cache.
    pub async fn call<B: CacheBackend + 'static>(
        &self,
        cache: &MethodCache<B>,
        entity: &E,
        args: &CallArgs,
    ) -> R {
        cache
            .get(entity, &self.name, self.ttl(cache), args, || {
                (self.compute)(entity, args)
            })
            .await
    }

    /// Call through the cache with no arguments.
    pub async fn call_no_args<B: CacheBackend + 'static>(
        &self,
        cache: &MethodCache<B>,
        entity: &E,
    ) -> R {
        self.call(cache, entity, &CallArgs::new()).await
    }

    /// Run the computation directly, bypassing every cache tier.
    pub fn call_uncached(&self, entity: &E, args: &CallArgs) -> R {
        (self.compute)(entity, args)
    }
}

impl<E, R> Clone for CachedMethod<E, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            ttl: self.ttl,
            compute: Arc::clone(&self.compute),
        }
    }
}

impl<E, R> fmt::Debug for CachedMethod<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedMethod")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
