//! The list of live method keys stored under a master key.
//!
//! Invalidation can only purge what it can enumerate, so every method key
//! written to the backend must first be recorded here. Each entry carries its
//! own expiry; entries that have already expired are dropped whenever the
//! list is rewritten, which keeps the list from growing without bound.

use std::time::Duration;

use memoir_core::{BackendError, Expiry, MemoirResult, MethodKey, Timestamp};
use serde::{Deserialize, Serialize};

/// Added to the registry's lifetime. The backend stamps an entry's expiry
/// after the registry's is computed, so without it a multiplier of 1 lets
/// the list expire just before the entry it lists.
pub const REGISTRY_GRACE: Duration = Duration::from_secs(1);

/// One registered method key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredKey {
    pub key: MethodKey,
    /// `None` means the entry never expires.
    pub expires_at: Option<Timestamp>,
}

/// Method keys currently registered for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRegistry {
    entries: Vec<RegisteredKey>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a registry read from the backend.
    pub fn decode(key: &str, bytes: &[u8]) -> MemoirResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            BackendError::Deserialization {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Encode for storage in the backend.
    pub fn encode(&self, key: &str) -> MemoirResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            BackendError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Record `key`, replacing an earlier entry for the same key and dropping
    /// entries that expired at or before `now`.
    pub fn register(&mut self, key: MethodKey, expires_at: Option<Timestamp>, now: Timestamp) {
        self.entries
            .retain(|entry| entry.key != key && entry.expires_at.map_or(true, |at| at > now));
        self.entries.push(RegisteredKey { key, expires_at });
    }

    /// Expiry for the registry itself.
    ///
    /// `Never` if any entry never expires; otherwise `multiplier` times the
    /// longest remaining lifetime plus [`REGISTRY_GRACE`], so the list always
    /// outlives what it tracks.
    pub fn expiry(&self, now: Timestamp, multiplier: u32) -> Expiry {
        let mut longest = Duration::ZERO;
        for entry in &self.entries {
            let Some(at) = entry.expires_at else {
                return Expiry::Never;
            };
            let remaining = (at - now).to_std().unwrap_or(Duration::ZERO);
            longest = longest.max(remaining);
        }
        let scaled = longest.saturating_mul(multiplier.max(1));
        Expiry::After(scaled.saturating_add(REGISTRY_GRACE))
    }

    pub fn contains(&self, key: &MethodKey) -> bool {
        self.entries.iter().any(|entry| &entry.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &MethodKey> {
        self.entries.iter().map(|entry| &entry.key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use memoir_core::{derive_master_key, derive_method_key, CallArgs};
    use uuid::Uuid;

    fn key(method: &str) -> MethodKey {
        let master = derive_master_key("Thing", Some(Uuid::from_u128(1))).unwrap();
        derive_method_key(&master, method, &CallArgs::new(), None).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[test]
    fn test_register_is_idempotent_per_key() {
        let now = Utc::now();
        let mut registry = KeyRegistry::new();
        registry.register(key("f"), Some(now + secs(60)), now);
        registry.register(key("f"), Some(now + secs(120)), now);

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&key("f")));
    }

    #[test]
    fn test_register_drops_expired_entries() {
        let now = Utc::now();
        let mut registry = KeyRegistry::new();
        registry.register(key("old"), Some(now + secs(10)), now);
        registry.register(key("forever"), None, now);

        let later = now + secs(11);
        registry.register(key("new"), Some(later + secs(60)), later);

        assert!(!registry.contains(&key("old")));
        assert!(registry.contains(&key("forever")));
        assert!(registry.contains(&key("new")));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_expiry_outlives_longest_entry() {
        let now = Utc::now();
        let mut registry = KeyRegistry::new();
        registry.register(key("short"), Some(now + secs(60)), now);
        registry.register(key("long"), Some(now + secs(3600)), now);

        assert_eq!(registry.expiry(now, 2), Expiry::After(Duration::from_secs(7201)));
    }

    #[test]
    fn test_expiry_with_multiplier_one_still_outlives_entry() {
        let now = Utc::now();
        let mut registry = KeyRegistry::new();
        registry.register(key("f"), Some(now + secs(60)), now);

        let Expiry::After(lifetime) = registry.expiry(now, 1) else {
            panic!("expected a finite registry lifetime");
        };
        assert!(lifetime > Duration::from_secs(60));
        assert_eq!(lifetime, Duration::from_secs(60) + REGISTRY_GRACE);
    }

    #[test]
    fn test_expiry_never_when_any_entry_is_permanent() {
        let now = Utc::now();
        let mut registry = KeyRegistry::new();
        registry.register(key("short"), Some(now + secs(60)), now);
        registry.register(key("forever"), None, now);

        assert_eq!(registry.expiry(now, 2), Expiry::Never);
    }

    #[test]
    fn test_encode_decode() {
        let now = Utc::now();
        let mut registry = KeyRegistry::new();
        registry.register(key("f"), Some(now + secs(60)), now);
        registry.register(key("g"), None, now);

        let bytes = registry.encode("master").unwrap();
        let decoded = KeyRegistry::decode("master", &bytes).unwrap();
        assert_eq!(decoded, registry);
        assert_eq!(decoded.keys().count(), 2);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = KeyRegistry::decode("master", b"not json").unwrap_err();
        assert!(matches!(
            err,
            memoir_core::MemoirError::Backend(BackendError::Deserialization { .. })
        ));
    }
}
