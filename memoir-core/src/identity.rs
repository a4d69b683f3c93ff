//! Identity and time types for cached entities

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

/// Stable identity of a persisted entity.
/// Absent (`None` at the call sites) until the persistence layer has saved it.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone. Also used as the last-modified marker.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// SHA-256 over length-delimited parts, rendered as lowercase hex.
///
/// Each part is prefixed with its length as a little-endian u64 so that
/// `["ab", "c"]` and `["a", "bc"]` produce different digests.
pub fn digest_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

// ============================================================================
// CLOCK
// ============================================================================

/// Source of "now" for expiry decisions.
///
/// Backends take a clock instead of calling `Utc::now()` directly so tests
/// can move time forward without sleeping.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Manually driven clock for simulated time.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Create a clock frozen at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let Ok(delta) = chrono::Duration::from_std(by) else {
            return;
        };
        if let Ok(mut now) = self.now.write() {
            if let Some(next) = now.checked_add_signed(delta) {
                *now = next;
            }
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: Timestamp) {
        if let Ok(mut now) = self.now.write() {
            *now = to;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_now()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.read().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}
