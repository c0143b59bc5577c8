//! Coordinator lifecycle, degraded operation and the optimization loop

use std::time::Duration;
use perflayer::{
    FeatureFlags, HealthLevel, IssueKind, ManagerState, ManualSampler, OptimizationConfig, OptimizationManager,
    PerfError, Remediation, TaskPriority,
};
use serde_json::json;
use tempfile::NamedTempFile;
use tokio::sync::oneshot;
use crate::mocks::{MockRequest, MockSessionFactory};

fn quiet_config() -> OptimizationConfig {
    let mut config = OptimizationConfig::default();
    config.optimizer.auto_optimization = false;
    config.async_processor.drain_timeout = 1.0;
    config
}

fn manager_with(config: OptimizationConfig, sampler: ManualSampler) -> OptimizationManager<MockSessionFactory> {
    OptimizationManager::with_sampler(config, MockSessionFactory::new(), Box::new(sampler)).unwrap()
}

#[tokio::test]
async fn test_stop_twice_leaves_manager_stopped() {
    let manager = manager_with(quiet_config(), ManualSampler::new(10.0, 10.0));

    manager.stop().await;
    assert_eq!(manager.state(), ManagerState::Stopped);

    manager.start().await.unwrap();
    manager.stop().await;
    manager.stop().await;
    assert_eq!(manager.state(), ManagerState::Stopped);
}

#[tokio::test]
async fn test_everything_disabled_still_serves_host() {
    let mut config = quiet_config();
    config.features = FeatureFlags::all_disabled();
    let manager = manager_with(config, ManualSampler::new(99.0, 99.0));
    manager.start().await.unwrap();

    manager.cache_set("k", json!(1), None).unwrap();
    assert_eq!(manager.cache_get("k"), None);

    let task_id = manager
        .submit_task("inline", TaskPriority::Normal, async { Ok(json!("done")) })
        .await
        .unwrap();
    assert_eq!(manager.wait_for_task(&task_id, Duration::from_millis(10)).await.unwrap(), json!("done"));

    let response = manager.request(MockRequest::Echo("hi".into())).await.unwrap();
    assert_eq!(response, "1:hi");

    let report = manager.get_status_report();
    assert_eq!(report.health.level, HealthLevel::Healthy);
    assert!(report.metrics.system.is_none());
    assert!(manager.export_prometheus().is_empty());
    assert_eq!(report.metrics.cache.misses, 1);

    // Misses on the stand-in cache never trigger a hit-rate remediation
    assert!(manager.run_optimization_cycle().is_clean());

    manager.stop().await;
}

#[tokio::test]
async fn test_try_submit_through_manager_reports_capacity() {
    let mut config = quiet_config();
    config.async_processor.max_workers = 1;
    config.async_processor.queue_size = 1;
    let manager = manager_with(config, ManualSampler::new(10.0, 10.0));
    manager.start().await.unwrap();

    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    manager
        .submit_task("gate", TaskPriority::Critical, async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok(json!(null))
        })
        .await
        .unwrap();
    started_rx.await.unwrap();

    let queued = manager
        .try_submit_task("queued", TaskPriority::Low, async { Ok(json!(1)) })
        .await
        .unwrap();
    let rejected = manager
        .try_submit_task("rejected", TaskPriority::Low, async { Ok(json!(2)) })
        .await;
    assert!(matches!(rejected, Err(PerfError::CapacityExceeded { .. })));

    release_tx.send(()).unwrap();
    assert_eq!(manager.wait_for_task(&queued, Duration::from_secs(1)).await.unwrap(), json!(1));
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_background_cycle_reacts_to_memory_pressure() {
    let mut config = quiet_config();
    config.optimizer.auto_optimization = true;
    config.optimizer.interval = 1.0;
    config.monitor.collection_interval = 0.5;

    let sampler = ManualSampler::new(10.0, 40.0);
    let readings = sampler.clone();
    let manager = manager_with(config, sampler);

    for i in 0..4 {
        manager.cache_set(&format!("entry-{}", i), json!(i), None).unwrap();
    }

    manager.start().await.unwrap();
    readings.set(10.0, 97.0);
    tokio::time::sleep(Duration::from_millis(1600)).await;

    let history = manager.optimization_history();
    let record = history.last().unwrap();
    assert_eq!(record.issues[0].kind, IssueKind::HighMemoryUsage);
    assert!(matches!(
        record.remediations[0],
        Remediation::ReclaimMemory { evicted_entries: 1, .. }
    ));
    assert_eq!(manager.get_current_metrics().cache.size, 3);

    let report = manager.get_status_report();
    assert!((report.performance_score - 77.5).abs() < 1e-9);
    assert!(!report.recommendations.is_empty());
    assert_eq!(report.health.level, HealthLevel::Critical);

    manager.stop().await;
}

#[tokio::test]
async fn test_export_report_after_restart() {
    let manager = manager_with(quiet_config(), ManualSampler::new(10.0, 10.0));
    manager.start().await.unwrap();
    manager.stop().await;
    manager.start().await.unwrap();

    manager.request(MockRequest::Echo("ping".into())).await.unwrap();
    manager.run_optimization_cycle();

    let file = NamedTempFile::new().unwrap();
    manager.export_report(file.path()).await.unwrap();
    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();

    assert_eq!(report["state"], "running");
    assert_eq!(report["metrics"]["connection_pool"]["total_requests"], 1);
    assert_eq!(report["total_optimizations"], 1);

    manager.stop().await;
}
