//! Performance layer: response cache, connection pooling, background task
//! execution and the coordinator that tunes them at runtime

pub mod cache;
pub mod connection_pool;
pub mod http;
pub mod priority_queue;
pub mod rules;
pub mod task_queue;

pub use cache::{response_key, CacheEfficiency, CacheEntry, CacheMemoryUsage, CacheStats, CacheStore, DisabledCache, TtlCache};
pub use connection_pool::{
    ConnectionPool, ConnectionProvider, PoolStats, PooledConnection, Session, SessionFactory, UnpooledConnections,
};
pub use http::{HttpRequest, HttpResponse, HttpSession, HttpSessionFactory};
pub use priority_queue::{PriorityQueue, TaskPriority};
pub use rules::{IssueKind, MetricsSnapshot, OptimizationRecord, PerformanceIssue, Remediation, Severity};
pub use task_queue::{InlineExecutor, Job, TaskExecutor, TaskId, TaskInfo, TaskQueue, TaskQueueStats, TaskStatus};

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::config::{FeatureFlags, OptimizationConfig, OptimizationLevel};
use crate::error::{PerfError, PerfResult};
use crate::observability::{
    ComponentHealth, DisabledMonitor, HealthReport, MetricsCollector, Monitor, ResourceSampler, SysinfoSampler,
};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Value type of coordinator-managed tasks and cache entries
pub type TaskOutput = Value;

/// Number of optimization records included in a status report
const REPORT_RECENT_OPTIMIZATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::Stopped => "stopped",
            ManagerState::Starting => "starting",
            ManagerState::Running => "running",
            ManagerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Everything the host needs to judge how the layer is doing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub state: ManagerState,
    pub optimization_level: OptimizationLevel,
    pub features: FeatureFlags,
    pub health: HealthReport,
    pub performance_score: f64,
    pub metrics: MetricsSnapshot,
    pub recommendations: Vec<String>,
    pub recent_optimizations: Vec<OptimizationRecord>,
    pub total_optimizations: usize,
}

struct ManagerInner<F: SessionFactory> {
    config: OptimizationConfig,
    factory: F,
    state: Mutex<ManagerState>,
    // Serialises start/stop; held across awaits
    lifecycle: tokio::sync::Mutex<()>,
    cache: Arc<dyn CacheStore<TaskOutput>>,
    monitor: Arc<dyn Monitor>,
    connections: Mutex<Option<Arc<dyn ConnectionProvider<F::Session>>>>,
    tasks: Mutex<Option<Arc<dyn TaskExecutor<TaskOutput>>>>,
    history: Mutex<VecDeque<OptimizationRecord>>,
    total_cycles: AtomicUsize,
    optimizer: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<F: SessionFactory> ManagerInner<F> {
    fn state(&self) -> ManagerState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ManagerState) {
        *lock(&self.state) = state;
        debug!(state = %state, "Optimization manager state changed");
    }

    fn executor(&self) -> Option<Arc<dyn TaskExecutor<TaskOutput>>> {
        lock(&self.tasks).clone()
    }

    fn provider(&self) -> Option<Arc<dyn ConnectionProvider<F::Session>>> {
        lock(&self.connections).clone()
    }

    fn current_metrics(&self) -> MetricsSnapshot {
        let system = self
            .monitor
            .is_enabled()
            .then(|| self.monitor.latest_snapshot().unwrap_or_else(|| self.monitor.sample_system()));

        MetricsSnapshot {
            timestamp: Utc::now(),
            system,
            status: self.monitor.current_status(),
            cache: self.cache.get_stats(),
            connection_pool: self.provider().map(|p| p.stats()).unwrap_or_default(),
            tasks: self.executor().map(|t| t.stats()).unwrap_or_default(),
            monitor: self.monitor.stats(),
        }
    }

    fn run_optimization_cycle(&self) -> OptimizationRecord {
        let started = Instant::now();
        let snapshot = self.current_metrics();
        let issues = rules::detect_issues(&snapshot, &self.config.optimizer.thresholds);

        let mut remediations = Vec::with_capacity(issues.len());
        for issue in &issues {
            match issue.kind {
                IssueKind::LowCacheHitRate => {
                    let removed = self.cache.cleanup_expired();
                    info!(hit_rate = issue.current_value, removed, "Cleaned up expired cache entries");
                    remediations.push(Remediation::CleanupExpired { removed });
                }
                IssueKind::HighMemoryUsage => remediations.push(self.reclaim_memory(issue.current_value)),
                kind => {
                    let message = rules::recommendation_for(kind).to_string();
                    warn!(
                        issue = %kind,
                        value = issue.current_value,
                        threshold = issue.threshold,
                        "{}", message
                    );
                    remediations.push(Remediation::Recommendation { issue: kind, message });
                }
            }
        }

        let record = OptimizationRecord {
            timestamp: Utc::now(),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            issues,
            remediations,
        };

        {
            let mut history = lock(&self.history);
            history.push_back(record.clone());
            while history.len() > self.config.optimizer.history_size.max(1) {
                history.pop_front();
            }
        }
        self.total_cycles.fetch_add(1, Ordering::Relaxed);

        self.publish_gauges(&snapshot);
        self.monitor.increment_counter("optimization_cycles_total", 1);
        if !record.is_clean() {
            self.monitor
                .increment_counter("optimization_issues_total", record.issues.len() as u64);
        }

        record
    }

    fn reclaim_memory(&self, memory_percent: f64) -> Remediation {
        let evicted_entries = self
            .cache
            .evict_fraction(self.config.optimizer.aggressive_eviction_fraction);
        self.cache.shrink();
        let purged_tasks = self.executor().map(|t| t.purge_history()).unwrap_or(0);
        let retired_connections = self.provider().map(|p| p.retire_idle()).unwrap_or(0);

        warn!(
            memory_percent,
            evicted_entries,
            purged_tasks,
            retired_connections,
            "Reclaimed resources under memory pressure"
        );

        Remediation::ReclaimMemory {
            evicted_entries,
            purged_tasks,
            retired_connections,
        }
    }

    fn publish_gauges(&self, snapshot: &MetricsSnapshot) {
        let gauges = [
            ("cache_hit_rate_percent", snapshot.cache.hit_rate_percent),
            ("cache_entries", snapshot.cache.size as f64),
            ("pool_active_connections", snapshot.connection_pool.active as f64),
            ("pool_idle_connections", snapshot.connection_pool.idle as f64),
            ("task_queue_depth", snapshot.tasks.queued as f64),
            ("task_active", snapshot.tasks.active as f64),
            ("performance_score", rules::performance_score(snapshot)),
        ];
        for (name, value) in gauges {
            self.monitor.set_gauge(name, value);
        }
    }

    fn health(&self) -> HealthReport {
        let connections = match self.provider() {
            Some(provider) => provider.health_check(),
            None => ComponentHealth::healthy("connection_pool").with_message("not started"),
        };
        let tasks = match self.executor() {
            Some(executor) => task_health(executor.as_ref()),
            None => ComponentHealth::healthy("task_queue").with_message("not started"),
        };

        HealthReport::from_components(vec![
            cache_health(self.cache.as_ref()),
            connections,
            tasks,
            self.monitor.health_check(),
        ])
    }
}

impl<F: SessionFactory> Drop for ManagerInner<F> {
    fn drop(&mut self) {
        if let Some((token, _)) = lock(&self.optimizer).as_ref() {
            token.cancel();
        }
    }
}

fn cache_health(cache: &dyn CacheStore<TaskOutput>) -> ComponentHealth {
    if !cache.is_enabled() {
        return ComponentHealth::disabled("cache");
    }

    let stats = cache.get_stats();
    let health = if stats.total_requests > 0 && stats.hit_rate_percent < 50.0 {
        ComponentHealth::warning("cache", "hit rate below 50%")
    } else {
        ComponentHealth::healthy("cache")
    };

    health
        .with_metadata("size", &stats.size.to_string())
        .with_metadata("max_size", &stats.max_size.to_string())
        .with_metadata("hit_rate_percent", &format!("{:.1}", stats.hit_rate_percent))
}

fn task_health(executor: &dyn TaskExecutor<TaskOutput>) -> ComponentHealth {
    if !executor.is_async() {
        return ComponentHealth::disabled("task_queue");
    }

    let stats = executor.stats();
    let finished = stats.completed + stats.failed;
    let health = if stats.queue_capacity > 0 && stats.queued * 10 >= stats.queue_capacity * 9 {
        ComponentHealth::warning("task_queue", "queue nearly full")
    } else if finished > 0 && stats.success_rate < 90.0 {
        ComponentHealth::warning("task_queue", "success rate below 90%")
    } else {
        ComponentHealth::healthy("task_queue")
    };

    health
        .with_metadata("queued", &stats.queued.to_string())
        .with_metadata("active", &stats.active.to_string())
        .with_metadata("workers", &stats.workers.to_string())
}

/// Owns the cache, connection pool, task queue and monitor, and runs the
/// periodic optimization cycle over them.
///
/// Cheap to clone; every clone drives the same components. Disabled
/// features are served by their stand-ins so the host never has to check
/// which ones are on.
pub struct OptimizationManager<F: SessionFactory> {
    inner: Arc<ManagerInner<F>>,
}

impl<F: SessionFactory> Clone for OptimizationManager<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: SessionFactory> fmt::Debug for OptimizationManager<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizationManager")
            .field("state", &self.inner.state())
            .field("optimization_level", &self.inner.config.optimization_level)
            .field("features", &self.inner.config.features)
            .finish()
    }
}

impl<F: SessionFactory + Clone> OptimizationManager<F> {
    /// Build the coordinator, sampling the host through `sysinfo`
    pub fn new(config: OptimizationConfig, factory: F) -> PerfResult<Self> {
        Self::with_sampler(config, factory, Box::new(SysinfoSampler::new()))
    }

    /// Build the coordinator with a custom resource sampler.
    ///
    /// Fails with a configuration error before anything is created if the
    /// configuration does not validate.
    pub fn with_sampler(config: OptimizationConfig, factory: F, sampler: Box<dyn ResourceSampler>) -> PerfResult<Self> {
        config.validate()?;
        let features = config.features;

        let cache: Arc<dyn CacheStore<TaskOutput>> = if features.caching {
            Arc::new(TtlCache::<TaskOutput>::from_config(&config.cache))
        } else {
            Arc::new(DisabledCache::new())
        };

        let monitor: Arc<dyn Monitor> = if features.performance_monitoring {
            Arc::new(MetricsCollector::with_sampler(&config.monitor, sampler))
        } else {
            Arc::new(DisabledMonitor)
        };

        let connections: Option<Arc<dyn ConnectionProvider<F::Session>>> = if features.connection_pooling {
            None
        } else {
            Some(Arc::new(UnpooledConnections::new(factory.clone())))
        };

        let tasks: Option<Arc<dyn TaskExecutor<TaskOutput>>> = if features.async_processing {
            None
        } else {
            Some(Arc::new(InlineExecutor::<TaskOutput>::new(config.async_processor.history_size)))
        };

        info!(
            level = %config.optimization_level,
            caching = features.caching,
            connection_pooling = features.connection_pooling,
            async_processing = features.async_processing,
            performance_monitoring = features.performance_monitoring,
            "Optimization manager created"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                factory,
                state: Mutex::new(ManagerState::Stopped),
                lifecycle: tokio::sync::Mutex::new(()),
                cache,
                monitor,
                connections: Mutex::new(connections),
                tasks: Mutex::new(tasks),
                history: Mutex::new(VecDeque::new()),
                total_cycles: AtomicUsize::new(0),
                optimizer: Mutex::new(None),
            }),
        })
    }

    /// Start every enabled component. A no-op when already running.
    ///
    /// The task queue and connection pool are created fresh on each start.
    pub async fn start(&self) -> PerfResult<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        if inner.state() == ManagerState::Running {
            debug!("Optimization manager already running");
            return Ok(());
        }

        inner.set_state(ManagerState::Starting);
        if let Err(e) = inner.config.validate() {
            inner.set_state(ManagerState::Stopped);
            error!(error = %e, "Refusing to start with invalid configuration");
            return Err(e);
        }

        let features = inner.config.features;
        if features.async_processing {
            let queue: Arc<dyn TaskExecutor<TaskOutput>> =
                Arc::new(TaskQueue::<TaskOutput>::new(&inner.config.async_processor));
            *lock(&inner.tasks) = Some(queue);
        }
        if features.connection_pooling {
            let pool: Arc<dyn ConnectionProvider<F::Session>> =
                Arc::new(ConnectionPool::new(inner.factory.clone(), &inner.config.connection_pool));
            *lock(&inner.connections) = Some(pool);
        }

        inner.monitor.start();
        if inner.config.optimizer.auto_optimization {
            self.spawn_optimizer();
        }

        inner.set_state(ManagerState::Running);
        info!(level = %inner.config.optimization_level, "Optimization manager started");
        Ok(())
    }
}

impl<F: SessionFactory> OptimizationManager<F> {
    fn spawn_optimizer(&self) {
        let mut optimizer = lock(&self.inner.optimizer);
        if optimizer.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let manager = Arc::downgrade(&self.inner);
        let period = self.inner.config.optimizer.interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = manager.upgrade() else { break };
                        match catch_unwind(AssertUnwindSafe(|| inner.run_optimization_cycle())) {
                            Ok(record) => debug!(
                                issues = record.issues.len(),
                                remediations = record.remediations.len(),
                                "Optimization cycle completed"
                            ),
                            Err(payload) => error!(
                                panic = %task_queue::panic_message(payload),
                                "Optimization cycle panicked"
                            ),
                        }
                    }
                }
            }
        });

        *optimizer = Some((token, handle));
        info!(interval_ms = period.as_millis() as u64, "Optimization loop started");
    }

    /// Drain the task queue, close pooled connections and stop the
    /// background loops. Idempotent.
    ///
    /// Task records stay queryable after stop.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        if inner.state() == ManagerState::Stopped {
            debug!("Optimization manager already stopped");
            return;
        }

        inner.set_state(ManagerState::Stopping);

        let optimizer = lock(&inner.optimizer).take();
        if let Some((token, handle)) = optimizer {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Optimization loop exited abnormally");
            }
        }

        if let Some(tasks) = inner.executor().filter(|t| t.is_async()) {
            tasks.shutdown(inner.config.async_processor.drain_timeout()).await;
        }
        if let Some(connections) = inner.provider().filter(|c| c.is_pooled()) {
            connections.close();
        }
        inner.monitor.stop().await;

        inner.set_state(ManagerState::Stopped);
        info!("Optimization manager stopped");
    }

    pub fn state(&self) -> ManagerState {
        self.inner.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ManagerState::Running
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.inner.config
    }

    fn executor(&self) -> PerfResult<Arc<dyn TaskExecutor<TaskOutput>>> {
        self.inner.executor().ok_or_else(|| PerfError::NotRunning {
            component: "task_queue".to_string(),
        })
    }

    fn provider(&self) -> PerfResult<Arc<dyn ConnectionProvider<F::Session>>> {
        self.inner.provider().ok_or_else(|| PerfError::NotRunning {
            component: "connection_pool".to_string(),
        })
    }

    /// Wrap a payload so its outcome and run time reach the monitor
    fn instrumented<Fut>(&self, future: Fut) -> Job<TaskOutput>
    where
        Fut: Future<Output = anyhow::Result<TaskOutput>> + Send + 'static,
    {
        let monitor = Arc::clone(&self.inner.monitor);
        Box::pin(async move {
            let started = Instant::now();
            let result = future.await;
            monitor.observe_duration("task", started.elapsed());
            let outcome = if result.is_ok() { "tasks_completed_total" } else { "tasks_failed_total" };
            monitor.increment_counter(outcome, 1);
            result
        })
    }

    /// Queue a task, waiting for space if the queue is full
    pub async fn submit_task<Fut>(&self, name: &str, priority: TaskPriority, future: Fut) -> PerfResult<TaskId>
    where
        Fut: Future<Output = anyhow::Result<TaskOutput>> + Send + 'static,
    {
        let executor = self.executor()?;
        let task_id = executor.submit_job(name, priority, self.instrumented(future)).await?;
        self.inner.monitor.increment_counter("tasks_submitted_total", 1);
        Ok(task_id)
    }

    /// Queue a task, failing with `CapacityExceeded` if the queue is full
    pub async fn try_submit_task<Fut>(&self, name: &str, priority: TaskPriority, future: Fut) -> PerfResult<TaskId>
    where
        Fut: Future<Output = anyhow::Result<TaskOutput>> + Send + 'static,
    {
        let executor = self.executor()?;
        let task_id = executor.try_submit_job(name, priority, self.instrumented(future)).await?;
        self.inner.monitor.increment_counter("tasks_submitted_total", 1);
        Ok(task_id)
    }

    pub fn task_status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.inner.executor()?.status(task_id)
    }

    pub fn task_info(&self, task_id: &TaskId) -> Option<TaskInfo> {
        self.inner.executor()?.info(task_id)
    }

    pub fn get_task_result(&self, task_id: &TaskId) -> PerfResult<TaskOutput> {
        self.executor()?.result(task_id)
    }

    pub async fn wait_for_task(&self, task_id: &TaskId, timeout: Duration) -> PerfResult<TaskOutput> {
        self.executor()?.wait(task_id, timeout).await
    }

    pub fn cancel_task(&self, task_id: &TaskId) -> PerfResult<bool> {
        self.executor()?.cancel(task_id)
    }

    /// Borrow a session, waiting at most `timeout` (the pool's configured
    /// timeout when `None`)
    pub async fn get_or_create_connection(&self, timeout: Option<Duration>) -> PerfResult<PooledConnection<F::Session>> {
        let provider = self.provider()?;
        let started = Instant::now();
        let result = provider.acquire(timeout).await;

        let monitor = &self.inner.monitor;
        monitor.observe_duration("connection_acquire", started.elapsed());
        match &result {
            Ok(_) => monitor.increment_counter("connection_acquisitions_total", 1),
            Err(PerfError::Timeout { .. }) => monitor.increment_counter("connection_acquire_timeouts_total", 1),
            Err(_) => monitor.increment_counter("connection_acquire_errors_total", 1),
        }
        result
    }

    pub fn release_connection(&self, connection: PooledConnection<F::Session>) {
        connection.release();
        self.inner.monitor.increment_counter("connection_releases_total", 1);
    }

    /// Run one request on a borrowed session and record its latency
    pub async fn request(
        &self,
        request: <F::Session as Session>::Request,
    ) -> PerfResult<<F::Session as Session>::Response> {
        let provider = self.provider()?;
        let started = Instant::now();
        let result = provider.request(request).await;

        self.inner.monitor.observe_duration("connection_request", started.elapsed());
        if result.is_err() {
            self.inner.monitor.increment_counter("connection_request_errors_total", 1);
        }
        result
    }

    pub fn cache_get(&self, key: &str) -> Option<TaskOutput> {
        self.inner.cache.get(key)
    }

    pub fn cache_set(&self, key: &str, value: TaskOutput, ttl: Option<Duration>) -> PerfResult<()> {
        self.inner.cache.set(key, value, ttl)
    }

    pub fn cache_delete(&self, key: &str) -> bool {
        self.inner.cache.delete(key)
    }

    pub fn cache_response(
        &self,
        prompt: &str,
        model: &str,
        temperature: f64,
        max_tokens: u32,
        response: TaskOutput,
        ttl: Option<Duration>,
    ) -> PerfResult<()> {
        self.cache_set(&response_key(prompt, model, temperature, max_tokens), response, ttl)
    }

    pub fn get_cached_response(&self, prompt: &str, model: &str, temperature: f64, max_tokens: u32) -> Option<TaskOutput> {
        self.cache_get(&response_key(prompt, model, temperature, max_tokens))
    }

    pub fn get_current_metrics(&self) -> MetricsSnapshot {
        self.inner.current_metrics()
    }

    /// Evaluate the rules once and apply remediations, outside the timer
    pub fn run_optimization_cycle(&self) -> OptimizationRecord {
        self.inner.run_optimization_cycle()
    }

    /// Retained optimization records, oldest first
    pub fn optimization_history(&self) -> Vec<OptimizationRecord> {
        lock(&self.inner.history).iter().cloned().collect()
    }

    pub fn health_check(&self) -> HealthReport {
        self.inner.health()
    }

    pub fn get_status_report(&self) -> StatusReport {
        let metrics = self.inner.current_metrics();
        let thresholds = &self.inner.config.optimizer.thresholds;

        let recent_optimizations = {
            let history = lock(&self.inner.history);
            let skip = history.len().saturating_sub(REPORT_RECENT_OPTIMIZATIONS);
            history.iter().skip(skip).cloned().collect()
        };

        StatusReport {
            timestamp: Utc::now(),
            state: self.state(),
            optimization_level: self.inner.config.optimization_level,
            features: self.inner.config.features,
            health: self.inner.health(),
            performance_score: rules::performance_score(&metrics),
            recommendations: rules::recommendations(&metrics, thresholds),
            metrics,
            recent_optimizations,
            total_optimizations: self.inner.total_cycles.load(Ordering::Relaxed),
        }
    }

    /// Write the status report to `path` as pretty-printed JSON
    pub async fn export_report(&self, path: impl AsRef<Path>) -> PerfResult<()> {
        let path = path.as_ref();
        let report = self.get_status_report();
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), "Performance report exported");
        Ok(())
    }

    pub fn export_prometheus(&self) -> String {
        self.inner.monitor.export_prometheus()
    }
}
