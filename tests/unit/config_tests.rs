//! Configuration loading and presets

use std::collections::HashMap;
use perflayer::{OptimizationConfig, OptimizationLevel, PerfError};
use tempfile::NamedTempFile;

#[test]
fn test_level_presets_validate() {
    for level in [OptimizationLevel::Minimal, OptimizationLevel::Balanced, OptimizationLevel::Aggressive] {
        let config = OptimizationConfig::for_level(level);
        assert!(config.validate().is_ok(), "{} preset should validate", level);
        assert_eq!(config.optimization_level, level);
    }
}

#[test]
fn test_feature_flags_from_file() {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(
        file.path(),
        "optimization_level = \"minimal\"\n\n[features]\ncaching = false\n\n[cache]\nmax_size = 100\n",
    )
    .unwrap();

    let config = OptimizationConfig::from_file(file.path()).unwrap();
    assert_eq!(config.optimization_level, OptimizationLevel::Minimal);
    assert!(!config.features.caching);
    assert!(config.features.connection_pooling);
}

#[test]
fn test_invalid_file_rejected() {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "[connection_pool]\nsize = 0\n").unwrap();

    match OptimizationConfig::from_file(file.path()) {
        Err(PerfError::Configuration { field, .. }) => assert_eq!(field, "connection_pool.size"),
        other => panic!("expected configuration error, got {:?}", other),
    }
}

#[test]
fn test_env_lookup_overrides() {
    let vars: HashMap<&str, &str> = [
        ("PERFLAYER_OPTIMIZATION_LEVEL", "Minimal"),
        ("PERFLAYER_ASYNC_MAX_WORKERS", "6"),
        ("PERFLAYER_ENABLE_PERFORMANCE_MONITORING", "false"),
    ]
    .into_iter()
    .collect();

    let config = OptimizationConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
    assert_eq!(config.optimization_level, OptimizationLevel::Minimal);
    assert_eq!(config.async_processor.max_workers, 6);
    assert_eq!(config.cache.max_size, 100);
    assert!(!config.features.performance_monitoring);
}
