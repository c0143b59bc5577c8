//! Response cache behaviour

use std::time::Duration;
use perflayer::{CacheStore, DisabledCache, PerfError, TtlCache};
use serde_json::json;

#[test]
fn test_set_get_and_miss_accounting() {
    let cache = TtlCache::new(100, Duration::from_secs(3600));
    cache.set("k", "v".to_string(), Some(Duration::from_secs(60))).unwrap();

    assert_eq!(cache.get("k"), Some("v".to_string()));
    assert_eq!(cache.get("missing"), None);

    let stats = cache.get_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.hit_rate_percent, 50.0);
}

#[test]
fn test_zero_ttl_rejected() {
    let cache: TtlCache<u32> = TtlCache::new(10, Duration::from_secs(60));
    match cache.set("k", 1, Some(Duration::ZERO)) {
        Err(PerfError::InvalidArgument { field, .. }) => assert_eq!(field, "ttl"),
        other => panic!("expected invalid argument, got {:?}", other),
    }
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_absent_then_swept() {
    let cache = TtlCache::new(10, Duration::from_secs(60));
    cache.set("short", 1u32, Some(Duration::from_secs(1))).unwrap();
    cache.set("long", 2u32, Some(Duration::from_secs(120))).unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;

    assert!(!cache.contains_key("short"));
    assert_eq!(cache.cleanup_expired(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("long"), Some(2));
}

#[test]
fn test_touched_key_outlives_untouched_neighbour() {
    let cache = TtlCache::new(10, Duration::from_secs(600)).with_eviction_fraction(0.1);
    cache.set("A", 0u32, None).unwrap();
    cache.set("B", 0u32, None).unwrap();

    for i in 0..20 {
        assert!(cache.get("A").is_some());
        cache.set(&format!("new-{}", i), i, None).unwrap();
        assert!(cache.len() <= 10);
    }

    assert!(cache.contains_key("A"));
    assert!(!cache.contains_key("B"));
    assert!(cache.get_stats().evictions >= 12);
}

#[test]
fn test_cached_responses_keyed_by_parameters() {
    let cache = TtlCache::new(10, Duration::from_secs(600));
    cache
        .cache_response("hello", "model-a", 0.7, 256, json!({"text": "hi"}), None)
        .unwrap();

    assert_eq!(
        cache.get_cached_response("hello", "model-a", 0.7, 256),
        Some(json!({"text": "hi"}))
    );
    assert_eq!(cache.get_cached_response("hello", "model-a", 0.2, 256), None);
    assert_eq!(cache.get_cached_response("hello", "model-b", 0.7, 256), None);
}

#[test]
fn test_preload_and_efficiency() {
    let cache = TtlCache::new(10, Duration::from_secs(600));
    assert!(cache.efficiency().is_none());

    let loaded = cache
        .preload(vec![("a".to_string(), 1u32), ("b".to_string(), 2u32)], None)
        .unwrap();
    assert_eq!(loaded, 2);
    cache.get("a");
    cache.get("a");

    let efficiency = cache.efficiency().unwrap();
    assert_eq!(efficiency.utilization_percent, 20.0);
    assert_eq!(efficiency.max_access_count, 2);

    let usage = cache.memory_usage();
    assert_eq!(usage.total_entries, 2);
    assert!(usage.estimated_bytes > 0);
}

#[test]
fn test_evict_fraction_drops_least_recent() {
    let cache = TtlCache::new(100, Duration::from_secs(600));
    for i in 0..8u32 {
        cache.set(&format!("k{}", i), i, None).unwrap();
    }
    cache.get("k0");

    assert_eq!(cache.evict_fraction(0.25), 2);
    assert!(cache.contains_key("k0"));
    assert!(!cache.contains_key("k1"));
    assert!(!cache.contains_key("k2"));
}

#[test]
fn test_disabled_cache_behind_trait() {
    let cache: Box<dyn CacheStore<String>> = Box::new(DisabledCache::new());
    cache.set("k", "v".to_string(), None).unwrap();

    assert_eq!(cache.get("k"), None);
    assert!(cache.is_empty());
    assert!(!cache.is_enabled());

    let stats = cache.get_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.total_requests, 1);
}
