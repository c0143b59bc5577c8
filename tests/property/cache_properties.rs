//! Property-based tests for the cache size bound and read-after-write

use std::collections::HashMap;
use std::time::Duration;
use proptest::prelude::*;
use perflayer::TtlCache;

proptest! {
    #[test]
    fn prop_cache_never_exceeds_max_size(
        max_size in 1usize..32,
        keys in prop::collection::vec("[a-z]{1,6}", 0..200),
    ) {
        let cache = TtlCache::new(max_size, Duration::from_secs(600));
        for (i, key) in keys.iter().enumerate() {
            cache.set(key, i, None).unwrap();
            prop_assert!(cache.len() <= max_size);
        }
        prop_assert!(cache.get_stats().size <= max_size);
    }

    #[test]
    fn prop_value_readable_right_after_set(
        writes in prop::collection::vec(("[a-z]{1,4}", any::<u32>(), 1_000u64..60_000), 1..50),
    ) {
        let cache = TtlCache::new(1000, Duration::from_secs(60));
        let mut expected = HashMap::new();
        for (key, value, ttl_ms) in &writes {
            cache.set(key, *value, Some(Duration::from_millis(*ttl_ms))).unwrap();
            prop_assert_eq!(cache.get(key), Some(*value));
            expected.insert(key.clone(), *value);
        }
        prop_assert_eq!(cache.len(), expected.len());
    }
}
