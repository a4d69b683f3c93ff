//! Memoir Test Utilities
//!
//! Shared test infrastructure for the memoir workspace:
//! - A `Thing` fixture entity and a `ThingStore` persistence layer that
//!   fires its save signal after every save
//! - Proptest generators for identities, arguments and TTLs
//! - Fixtures and assertions for common scenarios

pub use memoir_core::{
    CacheTtl, CallArgs, Clock, EntityId, KeyError, ManualClock, MemoirError, MemoirResult,
    MethodCacheConfig, SystemClock, Timestamp,
};
pub use memoir_storage::{
    CacheableEntity, InMemoryCacheBackend, InstanceCache, MethodCache, SaveSignal,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

// ============================================================================
// FIXTURE ENTITY
// ============================================================================

/// A small persisted entity with a date and a number.
///
/// Cloning keeps the persisted fields but starts with an empty instance
/// cache, the same as loading a fresh copy from the store.
#[derive(Debug, Clone)]
pub struct Thing {
    pub id: Option<EntityId>,
    pub date: NaiveDate,
    pub number: i64,
    pub last_modified: Option<Timestamp>,
    cache: InstanceCache,
}

impl Thing {
    /// An unsaved thing.
    pub fn new(date: NaiveDate, number: i64) -> Self {
        Self {
            id: None,
            date,
            number,
            last_modified: None,
            cache: InstanceCache::new(),
        }
    }

    /// Result that changes on every call, for telling computed values from cached ones.
    pub fn token(&self) -> u64 {
        fixtures::next_token()
    }

    /// Deterministic result depending on state and one argument.
    pub fn scaled(&self, factor: i64) -> i64 {
        self.number.saturating_mul(factor)
    }

    /// Summary of the persisted state.
    pub fn summary(&self) -> ThingSummary {
        ThingSummary {
            date: self.date,
            number: self.number,
            token: fixtures::next_token(),
        }
    }
}

impl CacheableEntity for Thing {
    fn entity_type() -> &'static str {
        "Thing"
    }

    fn entity_id(&self) -> Option<EntityId> {
        self.id
    }

    fn last_modified(&self) -> Option<Timestamp> {
        self.last_modified
    }

    fn instance_cache(&self) -> &InstanceCache {
        &self.cache
    }
}

/// Structured result returned by [`Thing::summary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingSummary {
    pub date: NaiveDate,
    pub number: i64,
    pub token: u64,
}

// ============================================================================
// PERSISTENCE LAYER
// ============================================================================

/// In-memory persistence layer for [`Thing`].
///
/// `save` assigns an identity on first save, bumps the last-modified marker,
/// clears the saved object's instance-local tier and notifies observers.
pub struct ThingStore {
    rows: RwLock<HashMap<EntityId, Thing>>,
    clock: Arc<dyn Clock>,
    signal: SaveSignal,
}

impl Default for ThingStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl ThingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose last-modified markers come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            clock,
            signal: SaveSignal::new(),
        }
    }

    /// The post-save notification channel.
    pub fn signal(&self) -> &SaveSignal {
        &self.signal
    }

    /// Persist `thing`. Returns the number of observers notified.
    pub async fn save(&self, thing: &mut Thing) -> usize {
        let id = *thing.id.get_or_insert_with(Uuid::now_v7);
        thing.last_modified = Some(self.clock.now());

        if let Ok(mut rows) = self.rows.write() {
            rows.insert(id, thing.clone());
        }

        self.signal.notify_saved(&*thing).await
    }

    /// Load a fresh copy with an empty instance cache.
    pub fn load(&self, id: EntityId) -> Option<Thing> {
        let rows = self.rows.read().ok()?;
        let thing = rows.get(&id).cloned();
        thing
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for memoir types.

    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a timestamp between 2000 and 2100.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (946_684_800i64..4_102_444_800i64)
            .prop_filter_map("representable", |secs| {
                chrono::DateTime::from_timestamp(secs, 0)
            })
    }

    /// Generate a calendar date.
    pub fn arb_date() -> impl Strategy<Value = NaiveDate> {
        (1970i32..2100, 1u32..=12, 1u32..=28)
            .prop_filter_map("valid date", |(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
    }

    /// Generate a single scalar argument value.
    pub fn arb_arg_value() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            any::<i64>().prop_map(serde_json::Value::from),
            any::<bool>().prop_map(serde_json::Value::from),
            "[a-z]{0,12}".prop_map(serde_json::Value::from),
            Just(serde_json::Value::Null),
        ]
    }

    /// Generate keyword arguments as a name-value list with unique names.
    pub fn arb_kwargs() -> impl Strategy<Value = Vec<(String, serde_json::Value)>> {
        prop::collection::btree_map("[a-z]{1,8}", arb_arg_value(), 0..5)
            .prop_map(|map| map.into_iter().collect())
    }

    /// Generate call arguments.
    pub fn arb_call_args() -> impl Strategy<Value = CallArgs> {
        (prop::collection::vec(arb_arg_value(), 0..4), arb_kwargs()).prop_filter_map(
            "encodable arguments",
            |(positional, keyword)| {
                let mut args = CallArgs::new();
                for value in &positional {
                    args.push(value).ok()?;
                }
                for (name, value) in &keyword {
                    args.insert(name.clone(), value).ok()?;
                }
                Some(args)
            },
        )
    }

    /// Generate a TTL policy.
    pub fn arb_cache_ttl() -> impl Strategy<Value = CacheTtl> {
        prop_oneof![
            Just(CacheTtl::Disabled),
            Just(CacheTtl::Forever),
            (1u64..86_400).prop_map(|secs| CacheTtl::For(Duration::from_secs(secs))),
        ]
    }

    /// Generate a saved thing.
    pub fn arb_saved_thing() -> impl Strategy<Value = Thing> {
        (arb_uuid(), arb_date(), any::<i64>(), arb_timestamp()).prop_map(
            |(id, date, number, modified)| {
                let mut thing = Thing::new(date, number);
                thing.id = Some(id);
                thing.last_modified = Some(modified);
                thing
            },
        )
    }

    /// Generate a valid configuration.
    pub fn arb_valid_config() -> impl Strategy<Value = MethodCacheConfig> {
        (
            prop::option::of("[a-z]{1,10}"),
            1u32..10,
            any::<bool>(),
            arb_cache_ttl(),
        )
            .prop_map(|(prefix, multiplier, track, ttl)| {
                let config = MethodCacheConfig::default()
                    .with_registry_ttl_multiplier(multiplier)
                    .with_last_modified_tracking(track)
                    .with_default_ttl(ttl);
                match prefix {
                    Some(prefix) => config.with_key_prefix(prefix),
                    None => config,
                }
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    static TOKENS: AtomicU64 = AtomicU64::new(1);

    /// Process-wide sequence; every call returns a new value.
    pub fn next_token() -> u64 {
        TOKENS.fetch_add(1, Ordering::Relaxed)
    }

    /// An unsaved thing with fixed field values.
    pub fn unsaved_thing() -> Thing {
        Thing::new(sample_date(), 42)
    }

    /// 2024-01-01.
    pub fn sample_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default()
    }

    /// A simulated clock starting at the current time.
    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::starting_now())
    }

    /// An in-memory backend, orchestrator and store sharing one simulated clock.
    ///
    /// The orchestrator is not yet attached to the store's save signal.
    pub fn memory_setup(
        clock: Arc<ManualClock>,
        config: MethodCacheConfig,
    ) -> MemoirResult<(MethodCache<InMemoryCacheBackend>, ThingStore)> {
        let backend = Arc::new(InMemoryCacheBackend::with_clock(clock.clone()));
        let cache = MethodCache::with_clock(backend, config, clock.clone())?;
        let store = ThingStore::with_clock(clock);
        Ok((cache, store))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for memoir results.

    use super::*;

    /// Assert that a MemoirResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &MemoirResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a MemoirResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &MemoirResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a MemoirResult is a backend error.
    #[track_caller]
    pub fn assert_backend_error<T: std::fmt::Debug>(result: &MemoirResult<T>) {
        match result {
            Err(MemoirError::Backend(_)) => {}
            other => panic!("Expected Backend error, got: {:?}", other),
        }
    }

    /// Assert that a MemoirResult is the "no identity yet" key error.
    #[track_caller]
    pub fn assert_unidentified<T: std::fmt::Debug>(result: &MemoirResult<T>) {
        match result {
            Err(MemoirError::Key(KeyError::Unidentified { .. })) => {}
            other => panic!("Expected Unidentified error, got: {:?}", other),
        }
    }

    /// Assert that a MethodCacheConfig is valid.
    #[track_caller]
    pub fn assert_config_valid(config: &MethodCacheConfig) {
        if let Err(e) = config.validate() {
            panic!("Config validation failed: {:?}", e);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
