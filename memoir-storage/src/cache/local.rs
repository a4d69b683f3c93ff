//! Instance-local cache tier.
//!
//! Each entity object owns one [`InstanceCache`]. It maps method keys to
//! computed results for as long as that object lives, so repeated calls on
//! the same object never reach the shared backend. It is never shared
//! between separately loaded copies of the same entity.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use memoir_core::MethodKey;

type Slot = Arc<dyn Any + Send + Sync>;

/// Method results cached on one in-memory entity object.
///
/// Cloning yields an empty cache: a clone is a different object and must
/// not observe values computed on the original.
#[derive(Default)]
pub struct InstanceCache {
    entries: RwLock<HashMap<MethodKey, Slot>>,
}

impl InstanceCache {
    /// Create an empty instance cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached result.
    ///
    /// Returns `None` if the key is absent, the stored value has a different
    /// type, or the lock is poisoned.
    pub fn get<R: Clone + 'static>(&self, key: &MethodKey) -> Option<R> {
        let entries = self.entries.read().ok()?;
        let value = entries.get(key)?.downcast_ref::<R>().cloned();
        value
    }

    /// Whether a result is cached under `key`.
    pub fn contains(&self, key: &MethodKey) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    /// Cache a result, replacing any previous value for the key.
    pub fn insert<R: Send + Sync + 'static>(&self, key: MethodKey, value: R) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, Arc::new(value));
        }
    }

    /// Remove one result. Returns whether it was present.
    pub fn remove(&self, key: &MethodKey) -> bool {
        self.entries
            .write()
            .map(|mut entries| entries.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Drop every cached result.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Number of cached results.
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Clone for InstanceCache {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl fmt::Debug for InstanceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceCache")
            .field("len", &self.len())
            .finish()
    }
}
