//! End-to-end scenarios driven through the coordinator's host contract

use std::time::Duration;
use perflayer::{
    ManualSampler, MetricsCollector, MonitorConfig, OptimizationConfig, OptimizationManager, PerfError, TaskPriority,
    TaskStatus,
};
use serde_json::json;
use crate::mocks::{MockRequest, MockSessionFactory};

fn host_config() -> OptimizationConfig {
    let mut config = OptimizationConfig::default();
    config.optimizer.auto_optimization = false;
    config.async_processor.drain_timeout = 1.0;
    config
}

fn host_manager(config: OptimizationConfig) -> OptimizationManager<MockSessionFactory> {
    OptimizationManager::with_sampler(config, MockSessionFactory::new(), Box::new(ManualSampler::new(20.0, 30.0))).unwrap()
}

#[tokio::test]
async fn test_cache_hit_and_miss() {
    let manager = host_manager(host_config());
    manager.start().await.unwrap();

    manager.cache_set("k", json!("v"), Some(Duration::from_secs(60))).unwrap();
    assert_eq!(manager.cache_get("k"), Some(json!("v")));
    assert_eq!(manager.cache_get("missing"), None);
    assert_eq!(manager.get_current_metrics().cache.misses, 1);

    manager.stop().await;
}

#[tokio::test]
async fn test_three_tasks_complete() {
    let manager = host_manager(host_config());
    manager.start().await.unwrap();

    let mut ids = Vec::new();
    for index in 0..3 {
        let id = manager
            .submit_task(&format!("task-{}", index), TaskPriority::Normal, async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(json!(index))
            })
            .await
            .unwrap();
        ids.push(id);
    }

    let mut values = Vec::new();
    for id in &ids {
        let value = manager.wait_for_task(id, Duration::from_secs(1)).await.unwrap();
        values.push(value.as_u64().unwrap());
        assert_eq!(manager.task_status(id), Some(TaskStatus::Completed));
    }
    values.sort();
    assert_eq!(values, vec![0, 1, 2]);

    manager.stop().await;
}

#[tokio::test]
async fn test_single_connection_pool_timeout_then_reuse() {
    let mut config = host_config();
    config.connection_pool.size = 1;
    let manager = host_manager(config);
    manager.start().await.unwrap();

    let first = manager.get_or_create_connection(None).await.unwrap();

    let contender = manager.clone();
    let second = tokio::spawn(async move {
        contender.get_or_create_connection(Some(Duration::from_millis(50))).await
    })
    .await
    .unwrap();
    assert!(matches!(second, Err(PerfError::Timeout { .. })));

    manager.release_connection(first);
    let mut third = manager.get_or_create_connection(Some(Duration::from_millis(50))).await.unwrap();
    assert_eq!(third.execute(MockRequest::Echo("again".into())).await.unwrap(), "1:again");
    manager.release_connection(third);

    let stats = manager.get_current_metrics().connection_pool;
    assert_eq!(stats.total_created, 1);
    assert_eq!(stats.timeouts, 1);

    manager.stop().await;
}

#[tokio::test]
async fn test_collector_samples_on_interval() {
    let config = MonitorConfig {
        collection_interval: 0.1,
        ..MonitorConfig::default()
    };
    let collector = MetricsCollector::with_sampler(&config, Box::new(ManualSampler::new(15.0, 25.0)));

    collector.start();
    tokio::time::sleep(Duration::from_millis(350)).await;
    collector.stop().await;

    let samples = collector.recent("cpu_percent", 10);
    assert!(samples.len() >= 2, "expected at least two samples, got {}", samples.len());
    for pair in samples.windows(2) {
        assert!(pair[0].timestamp < pair[1].timestamp);
    }
}
