//! Connection pool under concurrent load

use std::sync::Arc;
use std::time::Duration;
use perflayer::{
    ConnectionPool, ConnectionPoolConfig, ConnectionProvider, HealthLevel, PerfError, UnpooledConnections,
};
use crate::mocks::{MockRequest, MockSessionFactory};

fn pool_config(size: usize) -> ConnectionPoolConfig {
    ConnectionPoolConfig {
        size,
        timeout: 5.0,
        ..ConnectionPoolConfig::default()
    }
}

#[tokio::test]
async fn test_active_sessions_never_exceed_size() {
    let factory = MockSessionFactory::new();
    let pool = Arc::new(ConnectionPool::new(factory.clone(), &pool_config(3)));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            pool.request(MockRequest::Sleep(Duration::from_millis(20))).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert!(factory.max_in_flight() <= 3);
    assert!(factory.created() <= 3);

    let stats = pool.stats();
    assert_eq!(stats.total_requests, 10);
    assert_eq!(stats.active, 0);
    assert!(stats.idle <= 3);
    assert_eq!(stats.success_rate, 100.0);
}

#[tokio::test]
async fn test_failed_requests_degrade_health() {
    let pool = ConnectionPool::new(MockSessionFactory::new(), &pool_config(2));

    assert!(pool.request(MockRequest::Echo("ok".into())).await.is_ok());
    assert!(matches!(pool.request(MockRequest::Fail).await, Err(PerfError::Network { .. })));

    let stats = pool.stats();
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.success_rate, 50.0);
    assert_eq!(pool.health_check().level, HealthLevel::Warning);

    // a failed request still returns its session
    assert_eq!(stats.active, 0);
}

#[tokio::test]
async fn test_closed_pool_rejects_acquire() {
    let pool = ConnectionPool::new(MockSessionFactory::new(), &pool_config(1));
    let held = pool.acquire(None).await.unwrap();

    pool.close();
    assert!(pool.acquire(Some(Duration::from_millis(10))).await.is_err());
    pool.release(held);
    assert_eq!(pool.stats().idle, 0);
}

#[tokio::test]
async fn test_unpooled_connections_open_per_acquire() {
    let factory = MockSessionFactory::new();
    let provider: Box<dyn ConnectionProvider<_>> = Box::new(UnpooledConnections::new(factory.clone()));

    for _ in 0..3 {
        provider.request(MockRequest::Echo("x".into())).await.unwrap();
    }

    assert_eq!(factory.created(), 3);
    assert!(!provider.is_pooled());
    assert_eq!(provider.stats().idle, 0);
}
