//! Memoir Core - Types and Key Derivation
//!
//! Pure data structures and pure functions. The storage crate builds the
//! caching algorithm on top of these; nothing here touches a backend.

pub mod config;
pub mod error;
pub mod identity;
pub mod keys;

pub use config::{CacheTtl, Expiry, MethodCacheConfig};
pub use error::{BackendError, ConfigError, KeyError, MemoirError, MemoirResult};
pub use identity::{digest_hex, new_entity_id, Clock, EntityId, ManualClock, SystemClock, Timestamp};
pub use keys::{derive_master_key, derive_method_key, CallArgs, KeyDeriver, MasterKey, MethodKey};
