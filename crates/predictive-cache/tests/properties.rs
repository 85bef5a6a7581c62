use chrono::FixedOffset;
use predictive_cache::{
    compress_json, decompress_json, CacheStrategy, ContextBuilder, IntelligentCache,
    IntelligentConfig, ManualClock, MemorySessionStore, NoopPrefetcher, PredictiveCache,
    StoreConfig, StrategyRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const T0: u64 = 1_704_292_200_000;

fn predictive<V: predictive_cache::Payload>(
    clock: &ManualClock,
    registry: StrategyRegistry,
    max_total_size: usize,
) -> PredictiveCache<V> {
    let context = ContextBuilder::new(Arc::new(clock.clone()), Arc::new(MemorySessionStore::new()))
        .with_utc_offset(FixedOffset::east_opt(0).unwrap());
    let config = StoreConfig {
        max_total_size,
        ..StoreConfig::default()
    };
    PredictiveCache::new(config, registry, context, Arc::new(NoopPrefetcher))
}

fn flat_registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    registry.add_strategy(CacheStrategy::new("flat", Duration::from_secs(3600), 100, 5));
    registry
}

#[test]
fn compression_round_trips_json_values() {
    let values = [
        json!(null),
        json!(true),
        json!(-12.5),
        json!("Deployed"),
        json!([]),
        json!({"a": 1, "b": "x"}),
        json!({"regions": [{"name": "Nord", "hospitals": [1, 2, 3]}], "updated": "2024-01-03"}),
    ];
    for value in values {
        let back: Value = decompress_json(&compress_json(&value).unwrap()).unwrap();
        assert_eq!(back, value);
    }
}

#[test]
fn compression_concrete_object() {
    let packed = compress_json(&json!({"a": 1, "b": "x"})).unwrap();
    let back: Value = decompress_json(&packed).unwrap();
    assert_eq!(back, json!({"a": 1, "b": "x"}));
}

#[test]
fn entries_expire_one_ms_after_max_age() {
    let clock = ManualClock::new(T0);
    let mut registry = StrategyRegistry::new();
    registry.add_strategy(CacheStrategy::new("short", Duration::from_millis(1000), 10, 5));
    let mut cache: PredictiveCache<String> = predictive(&clock, registry, 1024);

    cache.set("/a", "a".into(), Some("short")).unwrap();
    cache.set("/b", "b".into(), Some("short")).unwrap();
    clock.advance(Duration::from_millis(1000));
    assert!(cache.get("/a").is_some(), "exactly max_age is still valid");

    clock.advance(Duration::from_millis(1));
    assert!(cache.get("/a").is_none());
    assert_eq!(cache.metrics().entry_count, 1);
    assert_eq!(cache.cleanup(), 1);
    assert_eq!(cache.metrics().entry_count, 0);
}

#[test]
fn budget_holds_except_for_a_lone_oversized_entry() {
    let clock = ManualClock::new(T0);
    let mut cache: PredictiveCache<String> = predictive(&clock, flat_registry(), 100);

    for i in 0..40 {
        let body = "x".repeat(1 + (i * 7) % 23);
        cache.set(&format!("/r/{i}"), body, Some("flat")).unwrap();
        clock.advance(Duration::from_millis(10));
        assert!(cache.total_size() <= 100, "budget exceeded after insert {i}");
    }

    // The one allowed exception: an entry larger than the whole budget
    // empties the store and is then inserted anyway.
    cache.set("/huge", "h".repeat(80), Some("flat")).unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.total_size(), 160);
    assert!(cache.contains("/huge"));

    // the next insert evicts it and the budget holds again
    cache.set("/small", "s".into(), Some("flat")).unwrap();
    assert!(cache.total_size() <= 100);
}

#[test]
fn unaccessed_entry_is_evicted_before_popular_one() {
    let clock = ManualClock::new(T0);
    let mut cache: PredictiveCache<String> = predictive(&clock, flat_registry(), 40);

    cache.set("/popular", "p".repeat(10), Some("flat")).unwrap();
    cache.set("/ignored", "i".repeat(10), Some("flat")).unwrap();
    for _ in 0..12 {
        assert!(cache.get("/popular").is_some());
    }

    cache.set("/new", "n".repeat(10), Some("flat")).unwrap();
    assert!(cache.contains("/popular"));
    assert!(!cache.contains("/ignored"));
    assert_eq!(cache.metrics().evictions, 1);
}

#[test]
fn strategy_resolution_is_repeatable() {
    let clock = ManualClock::new(T0);
    let cache: PredictiveCache<String> = predictive(&clock, StrategyRegistry::with_defaults(), 1024);
    for url in ["/hospitals/7", "/api/regions", "/images/pin.svg", "/unknown"] {
        let first = cache.best_strategy(url).map(|s| s.name.clone());
        let second = cache.best_strategy(url).map(|s| s.name.clone());
        assert_eq!(first, second, "{url}");
    }
}

#[test]
fn unmatched_url_is_not_cached() {
    let clock = ManualClock::new(T0);
    let mut cache: PredictiveCache<String> =
        predictive(&clock, StrategyRegistry::with_defaults(), 1024);
    assert!(!cache.set("/about", "about us".into(), None).unwrap());
    assert!(cache.get("/about").is_none());
}

#[test]
fn hit_and_miss_accounting() {
    let clock = ManualClock::new(T0);
    let mut cache: PredictiveCache<String> = predictive(&clock, flat_registry(), 1024);
    cache.clear();

    assert!(cache.get("/k").is_none());
    let m = cache.metrics();
    assert_eq!((m.hits, m.misses), (0, 1));

    cache.set("/k", "v".into(), Some("flat")).unwrap();
    assert!(cache.get("/k").is_some());
    let m = cache.metrics();
    assert_eq!((m.hits, m.misses), (1, 1));
    assert_eq!(m.hit_rate, 0.5);
}

#[test]
fn generic_cache_stays_under_cap() {
    let clock = ManualClock::new(0);
    let mut cache: IntelligentCache<Value> =
        IntelligentCache::new(IntelligentConfig::default(), Arc::new(clock.clone()));
    for i in 0..101 {
        cache.set(&format!("hospital-{i}"), json!({"id": i}), None).unwrap();
        clock.advance(Duration::from_millis(1));
    }
    assert!(cache.len() <= 100);
    // 20 of the first 100 were purged before the last insert
    assert_eq!(cache.len(), 81);
}

#[test]
fn api_strategy_scenario() {
    let clock = ManualClock::new(T0);
    let mut cache: PredictiveCache<Value> = predictive(&clock, StrategyRegistry::new(), 1024 * 1024);
    cache.add_strategy(CacheStrategy::new("api", Duration::from_millis(5000), 20, 7));

    assert!(cache.set("/api/hospitals", json!([{"id": "1"}]), Some("api")).unwrap());
    assert_eq!(cache.get("/api/hospitals"), Some(json!([{"id": "1"}])));

    clock.advance(Duration::from_millis(5001));
    assert_eq!(cache.get("/api/hospitals"), None);
}
