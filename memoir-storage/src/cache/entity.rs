//! What an entity must expose to have its method results cached.

use memoir_core::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

use super::local::InstanceCache;

/// Trait for persisted entities whose method results can be cached.
///
/// # Implementation Requirements
///
/// - `entity_type()` must return the same value for every instance of a type
/// - `entity_id()` returns `None` until the persistence layer has saved the entity
/// - `last_modified()` should change on every save; returning `None` disables
///   the redundant key-versioning channel for this type
/// - `instance_cache()` returns a cache owned by this in-memory object only
///
/// The persistence layer must clear the saved object's instance cache on
/// every save; [`SaveSignal::notify_saved`](super::hook::SaveSignal::notify_saved)
/// does this before notifying observers.
pub trait CacheableEntity: Send + Sync {
    /// Name of the entity type. Part of the master key.
    fn entity_type() -> &'static str;

    /// Identity assigned by the persistence layer.
    fn entity_id(&self) -> Option<EntityId>;

    /// Last-modified marker, if the entity tracks one.
    fn last_modified(&self) -> Option<Timestamp> {
        None
    }

    /// The instance-local cache tier of this object.
    fn instance_cache(&self) -> &InstanceCache;

    /// Owned reference used by save notifications.
    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(Self::entity_type(), self.entity_id())
    }
}

/// Type and identity of an entity, detached from the entity object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: Option<EntityId>,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: Option<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
        }
    }

    /// Whether the entity has been persisted.
    pub fn is_identified(&self) -> bool {
        self.entity_id.is_some()
    }
}
