//! Property-based tests for configuration presets and overrides

use proptest::prelude::*;
use perflayer::{OptimizationConfig, OptimizationLevel};

fn arb_level() -> impl Strategy<Value = OptimizationLevel> {
    prop_oneof![
        Just(OptimizationLevel::Minimal),
        Just(OptimizationLevel::Balanced),
        Just(OptimizationLevel::Aggressive),
    ]
}

proptest! {
    #[test]
    fn prop_overrides_win_over_any_preset(
        level in arb_level(),
        max_size in 1usize..100_000,
        workers in 1usize..64,
    ) {
        let level_name = level.to_string().to_uppercase();
        let max_size_text = max_size.to_string();
        let workers_text = workers.to_string();

        let config = OptimizationConfig::from_lookup(|key| match key {
            "PERFLAYER_OPTIMIZATION_LEVEL" => Some(level_name.clone()),
            "PERFLAYER_CACHE_MAX_SIZE" => Some(max_size_text.clone()),
            "PERFLAYER_ASYNC_MAX_WORKERS" => Some(workers_text.clone()),
            _ => None,
        })
        .unwrap();

        prop_assert_eq!(config.optimization_level, level);
        prop_assert_eq!(config.cache.max_size, max_size);
        prop_assert_eq!(config.async_processor.max_workers, workers);
        prop_assert_eq!(config.connection_pool.size, OptimizationConfig::for_level(level).connection_pool.size);
    }

    #[test]
    fn prop_bigger_levels_never_shrink_capacity(a in arb_level(), b in arb_level()) {
        let rank = |level: OptimizationLevel| match level {
            OptimizationLevel::Minimal => 0,
            OptimizationLevel::Balanced => 1,
            OptimizationLevel::Aggressive => 2,
        };
        let (small, large) = if rank(a) <= rank(b) { (a, b) } else { (b, a) };
        let small = OptimizationConfig::for_level(small);
        let large = OptimizationConfig::for_level(large);

        prop_assert!(small.cache.max_size <= large.cache.max_size);
        prop_assert!(small.connection_pool.size <= large.connection_pool.size);
        prop_assert!(small.async_processor.max_workers <= large.async_processor.max_workers);
        prop_assert!(small.async_processor.queue_size <= large.async_processor.queue_size);
        prop_assert!(small.monitor.collection_interval >= large.monitor.collection_interval);
    }
}
