//! Save notifications and the invalidation observer.
//!
//! The persistence layer owns a [`SaveSignal`] and fires it after every
//! successful save, normally with [`SaveSignal::notify_saved`]. Observers
//! only see an [`EntityRef`], so the saved object's own instance-local tier
//! must be cleared by the save path itself; `notify_saved` does both. The caching layer connects an [`InvalidationHook`] to it
//! with [`MethodCache::attach`]; the returned [`Subscription`] keeps the
//! observer connected until it is dropped, so the hook lives exactly as long
//! as the caching layer that installed it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use tracing::error;

use super::entity::{CacheableEntity, EntityRef};
use super::method_cache::MethodCache;
use super::traits::CacheBackend;

/// Receives a notification after an entity has been saved.
#[async_trait]
pub trait SaveObserver: Send + Sync {
    async fn after_save(&self, entity: &EntityRef);
}

type ObserverList = Vec<(u64, Arc<dyn SaveObserver>)>;

#[derive(Default)]
struct SignalInner {
    next_id: AtomicU64,
    observers: RwLock<ObserverList>,
}

/// Post-save notification channel owned by a persistence layer.
///
/// Clones share the same observer list.
#[derive(Clone, Default)]
pub struct SaveSignal {
    inner: Arc<SignalInner>,
}

impl SaveSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect an observer. It stays connected while the subscription lives.
    pub fn connect(&self, observer: Arc<dyn SaveObserver>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut observers) = self.inner.observers.write() {
            observers.push((id, observer));
        }
        Subscription {
            id,
            signal: Arc::downgrade(&self.inner),
        }
    }

    /// Clear the saved object's instance-local tier, then notify observers.
    ///
    /// Returns the number of observers notified. Persistence layers that
    /// call [`SaveSignal::send`] directly must clear the tier themselves.
    pub async fn notify_saved<E: CacheableEntity>(&self, entity: &E) -> usize {
        entity.instance_cache().clear();
        self.send(&entity.entity_ref()).await
    }

    /// Notify every connected observer in connection order.
    ///
    /// Returns the number of observers notified.
    pub async fn send(&self, entity: &EntityRef) -> usize {
        let observers: Vec<Arc<dyn SaveObserver>> = self
            .inner
            .observers
            .read()
            .map(|observers| observers.iter().map(|(_, o)| Arc::clone(o)).collect())
            .unwrap_or_default();

        for observer in &observers {
            observer.after_save(entity).await;
        }
        observers.len()
    }

    /// Number of connected observers.
    pub fn observer_count(&self) -> usize {
        self.inner
            .observers
            .read()
            .map(|observers| observers.len())
            .unwrap_or(0)
    }
}

impl fmt::Debug for SaveSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveSignal")
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Connection of one observer to a [`SaveSignal`].
///
/// Dropping it disconnects the observer.
#[must_use = "dropping a Subscription disconnects its observer immediately"]
pub struct Subscription {
    id: u64,
    signal: Weak<SignalInner>,
}

impl Subscription {
    /// Disconnect now.
    pub fn disconnect(self) {
        drop(self);
    }

    /// Whether the observer is still connected to a live signal.
    pub fn is_connected(&self) -> bool {
        let Some(inner) = self.signal.upgrade() else {
            return false;
        };
        let connected = inner
            .observers
            .read()
            .map(|observers| observers.iter().any(|(id, _)| *id == self.id))
            .unwrap_or(false);
        connected
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.signal.upgrade() {
            if let Ok(mut observers) = inner.observers.write() {
                observers.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Observer that purges a saved entity's cached method results.
///
/// Failures are logged, never returned to the saving caller.
pub struct InvalidationHook<B: CacheBackend> {
    cache: MethodCache<B>,
}

impl<B: CacheBackend + 'static> InvalidationHook<B> {
    pub fn new(cache: MethodCache<B>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl<B: CacheBackend + 'static> SaveObserver for InvalidationHook<B> {
    async fn after_save(&self, entity: &EntityRef) {
        if let Err(e) = self.cache.invalidate(entity).await {
            error!(
                entity_type = %entity.entity_type,
                entity_id = ?entity.entity_id,
                error = %e,
                "invalidation after save failed; stale results live until they expire"
            );
        }
    }
}
