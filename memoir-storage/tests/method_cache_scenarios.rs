//! End-to-end scenarios for the method cache.
//!
//! Each scenario wires an in-memory backend, a `MethodCache` and a
//! `ThingStore` persistence layer sharing one simulated clock, then drives
//! cached methods through saves, reloads and expiry.

use std::time::Duration;

use memoir_storage::{CacheTtl, CachedMethod, CallArgs, MethodCacheConfig};
use memoir_test_utils::{fixtures, Thing, ThingSummary};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Route cache logs to the test output; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn token_method(ttl: CacheTtl) -> CachedMethod<Thing, u64> {
    CachedMethod::new("token", ttl, |thing: &Thing, _| thing.token())
}

fn scaled_method(ttl: CacheTtl) -> CachedMethod<Thing, (i64, u64)> {
    CachedMethod::new("scaled", ttl, |thing: &Thing, args: &CallArgs| {
        let factor = args.get::<i64>(0).unwrap_or(1);
        (thing.scaled(factor), thing.token())
    })
}

fn times_ten_method() -> CachedMethod<Thing, i64> {
    CachedMethod::new("times_ten", CacheTtl::Forever, |thing: &Thing, _| {
        thing.scaled(10)
    })
}

fn factor(n: i64) -> CallArgs {
    CallArgs::new().arg(&n).expect("integers always encode")
}

#[tokio::test]
async fn test_unsaved_entity_is_never_cached() {
    init_tracing();
    let (cache, _store) =
        fixtures::memory_setup(fixtures::manual_clock(), MethodCacheConfig::default())
            .expect("valid config");
    let token = token_method(CacheTtl::Forever);
    let thing = fixtures::unsaved_thing();

    let first = token.call_no_args(&cache, &thing).await;
    let second = token.call_no_args(&cache, &thing).await;

    assert_ne!(first, second);
    assert!(cache.backend().live_keys().await.is_empty());
    assert_eq!(cache.stats().uncached, 2);
}

#[tokio::test]
async fn test_same_arguments_return_cached_result() {
    let clock = fixtures::manual_clock();
    let (cache, store) =
        fixtures::memory_setup(clock, MethodCacheConfig::default()).expect("valid config");
    let _subscription = cache.attach(store.signal());
    let scaled = scaled_method(CacheTtl::from_secs(300));

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;

    let first = scaled.call(&cache, &thing, &factor(3)).await;
    let second = scaled.call(&cache, &thing, &factor(3)).await;
    assert_eq!(first, second);
    assert_eq!(first.0, 126);

    let reloaded = store.load(thing.id.expect("saved")).expect("stored");
    assert_eq!(scaled.call(&cache, &reloaded, &factor(3)).await, first);
}

#[tokio::test]
async fn test_different_arguments_get_different_entries() {
    let (cache, store) =
        fixtures::memory_setup(fixtures::manual_clock(), MethodCacheConfig::default())
            .expect("valid config");
    let scaled = scaled_method(CacheTtl::Forever);

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;

    let by_two = scaled.call(&cache, &thing, &factor(2)).await;
    let by_five = scaled.call(&cache, &thing, &factor(5)).await;

    assert_eq!(by_two.0, 84);
    assert_eq!(by_five.0, 210);
    assert_ne!(by_two.1, by_five.1);
    // registry + two entries
    assert_eq!(cache.backend().live_keys().await.len(), 3);
}

#[tokio::test]
async fn test_saving_one_entity_leaves_others_cached() {
    init_tracing();
    let (cache, store) =
        fixtures::memory_setup(fixtures::manual_clock(), MethodCacheConfig::default())
            .expect("valid config");
    let _subscription = cache.attach(store.signal());
    let token = token_method(CacheTtl::Forever);

    let mut e1 = fixtures::unsaved_thing();
    let mut e2 = fixtures::unsaved_thing();
    store.save(&mut e1).await;
    store.save(&mut e2).await;

    let e1_before = token.call_no_args(&cache, &e1).await;
    let e2_before = token.call_no_args(&cache, &e2).await;

    e2.number += 1;
    assert_eq!(store.save(&mut e2).await, 1);

    let e1_fresh = store.load(e1.id.expect("saved")).expect("stored");
    let e2_fresh = store.load(e2.id.expect("saved")).expect("stored");

    assert_eq!(token.call_no_args(&cache, &e1_fresh).await, e1_before);
    assert_ne!(token.call_no_args(&cache, &e2_fresh).await, e2_before);
    // two first saves plus the mutation
    assert_eq!(cache.stats().invalidations, 3);
}

#[tokio::test]
async fn test_invalidation_purges_without_last_modified_tracking() {
    let config = MethodCacheConfig::default().with_last_modified_tracking(false);
    let (cache, store) =
        fixtures::memory_setup(fixtures::manual_clock(), config).expect("valid config");
    let _subscription = cache.attach(store.signal());
    let token = token_method(CacheTtl::Forever);

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;
    let before = token.call_no_args(&cache, &thing).await;
    assert_eq!(cache.backend().live_keys().await.len(), 2);

    store.save(&mut thing).await;
    assert!(cache.backend().live_keys().await.is_empty());

    let reloaded = store.load(thing.id.expect("saved")).expect("stored");
    assert_ne!(token.call_no_args(&cache, &reloaded).await, before);
}

#[tokio::test]
async fn test_fresh_copy_sees_backend_result_only_when_enabled() {
    let (cache, store) =
        fixtures::memory_setup(fixtures::manual_clock(), MethodCacheConfig::default())
            .expect("valid config");
    let shared = token_method(CacheTtl::Forever);
    let local_only = CachedMethod::new("local", CacheTtl::Disabled, |thing: &Thing, _| {
        thing.token()
    });

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;
    let shared_value = shared.call_no_args(&cache, &thing).await;
    let local_value = local_only.call_no_args(&cache, &thing).await;
    assert_eq!(local_only.call_no_args(&cache, &thing).await, local_value);

    let copy = store.load(thing.id.expect("saved")).expect("stored");
    assert_eq!(shared.call_no_args(&cache, &copy).await, shared_value);
    assert_ne!(local_only.call_no_args(&cache, &copy).await, local_value);
}

#[tokio::test]
async fn test_ttl_expiry_without_mutation() {
    let clock = fixtures::manual_clock();
    let (cache, store) =
        fixtures::memory_setup(clock.clone(), MethodCacheConfig::default()).expect("valid config");
    let token = token_method(CacheTtl::from_secs(60));

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;
    let id = thing.id.expect("saved");

    let first = token.call_no_args(&cache, &thing).await;
    clock.advance(Duration::from_secs(30));
    let copy = store.load(id).expect("stored");
    assert_eq!(token.call_no_args(&cache, &copy).await, first);

    clock.advance(Duration::from_secs(31));
    let copy = store.load(id).expect("stored");
    assert_ne!(token.call_no_args(&cache, &copy).await, first);
}

#[tokio::test]
async fn test_registry_outlives_its_entries() {
    let clock = fixtures::manual_clock();
    let (cache, store) =
        fixtures::memory_setup(clock.clone(), MethodCacheConfig::default()).expect("valid config");
    let _subscription = cache.attach(store.signal());
    let token = token_method(CacheTtl::from_secs(60));

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;
    token.call_no_args(&cache, &thing).await;

    // Entry expired, registry (2x lifetime) still present.
    clock.advance(Duration::from_secs(90));
    assert_eq!(cache.backend().live_keys().await.len(), 1);

    clock.advance(Duration::from_secs(31));
    assert!(cache.backend().live_keys().await.is_empty());
}

#[tokio::test]
async fn test_backend_outage_falls_back_to_compute() {
    init_tracing();
    let (cache, store) =
        fixtures::memory_setup(fixtures::manual_clock(), MethodCacheConfig::default())
            .expect("valid config");
    let _subscription = cache.attach(store.signal());
    let token = token_method(CacheTtl::Forever);

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;

    cache.backend().set_unavailable(true);
    let first = token.call_no_args(&cache, &thing).await;
    assert_eq!(token.call_no_args(&cache, &thing).await, first);

    // Save must complete even though invalidation cannot reach the backend.
    assert_eq!(store.save(&mut thing).await, 1);
    assert_eq!(cache.stats().invalidation_failures, 1);

    cache.backend().set_unavailable(false);
    let copy = store.load(thing.id.expect("saved")).expect("stored");
    assert_ne!(token.call_no_args(&cache, &copy).await, first);
}

#[tokio::test]
async fn test_dropped_subscription_stops_invalidation() {
    let config = MethodCacheConfig::default().with_last_modified_tracking(false);
    let (cache, store) =
        fixtures::memory_setup(fixtures::manual_clock(), config).expect("valid config");
    let subscription = cache.attach(store.signal());
    let token = token_method(CacheTtl::Forever);

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;
    let before = token.call_no_args(&cache, &thing).await;

    subscription.disconnect();
    assert_eq!(store.signal().observer_count(), 0);
    assert_eq!(store.save(&mut thing).await, 0);

    let copy = store.load(thing.id.expect("saved")).expect("stored");
    assert_eq!(token.call_no_args(&cache, &copy).await, before);
}

#[tokio::test]
async fn test_structured_and_empty_results() {
    let (cache, store) =
        fixtures::memory_setup(fixtures::manual_clock(), MethodCacheConfig::default())
            .expect("valid config");
    let summary = CachedMethod::new("summary", CacheTtl::Forever, |thing: &Thing, _| {
        thing.summary()
    });
    let nothing = CachedMethod::new("nothing", CacheTtl::Forever, |_: &Thing, _| {
        fixtures::next_token();
        Vec::<String>::new()
    });

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;

    let first: ThingSummary = summary.call_no_args(&cache, &thing).await;
    assert_eq!(first.number, 42);
    assert_eq!(nothing.call_no_args(&cache, &thing).await, Vec::<String>::new());

    let copy = store.load(thing.id.expect("saved")).expect("stored");
    assert_eq!(summary.call_no_args(&cache, &copy).await, first);
    assert!(nothing.call_no_args(&cache, &copy).await.is_empty());

    let stats = cache.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.backend_hits, 2);
}

#[tokio::test]
async fn test_saved_object_recomputes_on_frozen_clock() {
    // The clock never moves, so the last-modified marker does not change.
    let (cache, store) =
        fixtures::memory_setup(fixtures::manual_clock(), MethodCacheConfig::default())
            .expect("valid config");
    let _subscription = cache.attach(store.signal());
    let times_ten = times_ten_method();

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;
    assert_eq!(times_ten.call_no_args(&cache, &thing).await, 420);

    thing.number = 7;
    store.save(&mut thing).await;
    assert_eq!(times_ten.call_no_args(&cache, &thing).await, 70);
}

#[tokio::test]
async fn test_saved_object_recomputes_without_last_modified_tracking() {
    let clock = fixtures::manual_clock();
    let config = MethodCacheConfig::default().with_last_modified_tracking(false);
    let (cache, store) = fixtures::memory_setup(clock.clone(), config).expect("valid config");
    let _subscription = cache.attach(store.signal());
    let times_ten = times_ten_method();

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;
    assert_eq!(times_ten.call_no_args(&cache, &thing).await, 420);

    clock.advance(Duration::from_secs(5));
    thing.number = 3;
    store.save(&mut thing).await;
    assert_eq!(times_ten.call_no_args(&cache, &thing).await, 30);
    assert_eq!(cache.stats().misses, 2);
}

#[tokio::test]
async fn test_registry_outlives_entries_with_multiplier_one() {
    let clock = fixtures::manual_clock();
    let config = MethodCacheConfig::default().with_registry_ttl_multiplier(1);
    let (cache, store) = fixtures::memory_setup(clock.clone(), config).expect("valid config");
    let token = token_method(CacheTtl::from_secs(60));

    let mut thing = fixtures::unsaved_thing();
    store.save(&mut thing).await;
    token.call_no_args(&cache, &thing).await;

    clock.advance(Duration::from_millis(59_999));
    assert_eq!(cache.backend().live_keys().await.len(), 2);

    // Entry gone, registry still listed for its grace period.
    clock.advance(Duration::from_millis(1));
    assert_eq!(cache.backend().live_keys().await.len(), 1);

    clock.advance(Duration::from_secs(1));
    assert!(cache.backend().live_keys().await.is_empty());
}
