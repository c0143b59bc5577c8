//! perflayer - an in-process performance layer for request-serving hosts
//!
//! perflayer bundles the pieces a host application reaches for when it
//! needs to go faster without changing its own logic:
//! - a TTL response cache with LRU eviction
//! - a bounded pool of reusable network sessions
//! - a priority task queue drained by a fixed set of tokio workers
//! - a resource monitor with counters, gauges and Prometheus export
//!
//! [`OptimizationManager`] owns all four, drives their lifecycle and runs a
//! periodic cycle that reacts to threshold breaches.

pub mod config;
pub mod error;
pub mod observability;
pub mod performance;

// Re-export commonly used types for convenience
pub use error::{NetworkError, PerfError, PerfResult};

// Re-export configuration interfaces
pub use config::{
    AsyncProcessorConfig, CacheConfig, ConnectionPoolConfig, FeatureFlags, MonitorConfig, OptimizationConfig,
    OptimizationLevel, OptimizerConfig, PerformanceThresholds,
};

// Re-export the coordinator and its components
pub use performance::{
    CacheStats, CacheStore, ConnectionPool, ConnectionProvider, DisabledCache, HttpRequest, HttpResponse,
    HttpSession, HttpSessionFactory, InlineExecutor, IssueKind, ManagerState, MetricsSnapshot, OptimizationManager,
    OptimizationRecord, PoolStats, PooledConnection, Remediation, Session, SessionFactory, StatusReport, TaskExecutor,
    TaskId, TaskInfo, TaskOutput, TaskPriority, TaskQueue, TaskQueueStats, TaskStatus, TtlCache, UnpooledConnections,
};

// Re-export monitoring interfaces
pub use observability::{
    ComponentHealth, DisabledMonitor, HealthLevel, HealthReport, ManualSampler, MetricSample, MetricsCollector, Monitor,
    MonitorStats, ResourceSampler, SysinfoSampler, SystemSnapshot,
};
