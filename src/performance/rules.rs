//! Threshold rules evaluated by the optimization cycle

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::config::PerformanceThresholds;
use crate::observability::{HealthLevel, MonitorStats, SystemSnapshot};
use super::cache::CacheStats;
use super::connection_pool::PoolStats;
use super::task_queue::TaskQueueStats;

/// Point-in-time view of every component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub system: Option<SystemSnapshot>,
    pub status: HealthLevel,
    pub cache: CacheStats,
    pub connection_pool: PoolStats,
    pub tasks: TaskQueueStats,
    pub monitor: MonitorStats,
}

impl MetricsSnapshot {
    /// Memory reading, if the platform reported one
    pub fn memory_percent(&self) -> Option<f64> {
        self.system.as_ref().filter(|s| s.available).map(|s| s.memory_percent)
    }

    pub fn cpu_percent(&self) -> Option<f64> {
        self.system.as_ref().filter(|s| s.available).map(|s| s.cpu_percent)
    }

    /// Cache hit rate, or `None` before the first lookup
    pub fn cache_hit_rate(&self) -> Option<f64> {
        // A zero-capacity cache is the disabled stand-in; its misses say nothing
        (self.cache.max_size > 0 && self.cache.total_requests > 0).then_some(self.cache.hit_rate_percent)
    }

    pub fn response_time_ms(&self) -> Option<f64> {
        (self.connection_pool.total_requests > 0).then_some(self.connection_pool.avg_response_time_ms)
    }

    pub fn error_rate(&self) -> Option<f64> {
        (self.connection_pool.total_requests > 0).then_some(self.connection_pool.error_rate())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    HighResponseTime,
    HighMemoryUsage,
    HighCpuUsage,
    LowCacheHitRate,
    HighErrorRate,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueKind::HighResponseTime => "high_response_time",
            IssueKind::HighMemoryUsage => "high_memory_usage",
            IssueKind::HighCpuUsage => "high_cpu_usage",
            IssueKind::LowCacheHitRate => "low_cache_hit_rate",
            IssueKind::HighErrorRate => "high_error_rate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

/// A threshold breach found in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub current_value: f64,
    pub threshold: f64,
    pub description: String,
}

/// What the cycle did about an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Remediation {
    CleanupExpired { removed: usize },
    ReclaimMemory {
        evicted_entries: usize,
        purged_tasks: usize,
        retired_connections: usize,
    },
    Recommendation { issue: IssueKind, message: String },
}

/// One pass of the optimization cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecord {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: f64,
    pub issues: Vec<PerformanceIssue>,
    pub remediations: Vec<Remediation>,
}

impl OptimizationRecord {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Compare a snapshot against the thresholds.
///
/// Rules with no data yet (no cache lookups, no pooled requests, no system
/// reading) do not fire.
pub fn detect_issues(snapshot: &MetricsSnapshot, thresholds: &PerformanceThresholds) -> Vec<PerformanceIssue> {
    let mut issues = Vec::new();

    if let Some(response_ms) = snapshot.response_time_ms() {
        if response_ms > thresholds.response_time_ms {
            issues.push(PerformanceIssue {
                kind: IssueKind::HighResponseTime,
                severity: Severity::Medium,
                current_value: response_ms,
                threshold: thresholds.response_time_ms,
                description: format!("average response time {:.1}ms exceeds threshold", response_ms),
            });
        }
    }

    if let Some(memory) = snapshot.memory_percent() {
        if memory > thresholds.memory_usage_percent {
            issues.push(PerformanceIssue {
                kind: IssueKind::HighMemoryUsage,
                severity: Severity::High,
                current_value: memory,
                threshold: thresholds.memory_usage_percent,
                description: format!("memory usage {:.1}% exceeds threshold", memory),
            });
        }
    }

    if let Some(cpu) = snapshot.cpu_percent() {
        if cpu > thresholds.cpu_usage_percent {
            issues.push(PerformanceIssue {
                kind: IssueKind::HighCpuUsage,
                severity: Severity::Medium,
                current_value: cpu,
                threshold: thresholds.cpu_usage_percent,
                description: format!("CPU usage {:.1}% exceeds threshold", cpu),
            });
        }
    }

    if let Some(hit_rate) = snapshot.cache_hit_rate() {
        if hit_rate < thresholds.cache_hit_rate_percent {
            issues.push(PerformanceIssue {
                kind: IssueKind::LowCacheHitRate,
                severity: Severity::Medium,
                current_value: hit_rate,
                threshold: thresholds.cache_hit_rate_percent,
                description: format!("cache hit rate {:.1}% below threshold", hit_rate),
            });
        }
    }

    if let Some(error_rate) = snapshot.error_rate() {
        if error_rate > thresholds.error_rate_percent {
            issues.push(PerformanceIssue {
                kind: IssueKind::HighErrorRate,
                severity: Severity::High,
                current_value: error_rate,
                threshold: thresholds.error_rate_percent,
                description: format!("connection error rate {:.1}% exceeds threshold", error_rate),
            });
        }
    }

    issues
}

/// Overall score from 0 to 100. Response time, memory, cache hit rate and
/// error rate each deduct up to 30, 25, 20 and 25 points.
pub fn performance_score(snapshot: &MetricsSnapshot) -> f64 {
    let mut score = 100.0;

    let response_ms = snapshot.response_time_ms().unwrap_or(0.0);
    if response_ms > 1000.0 {
        score -= f64::min(30.0, (response_ms - 1000.0) / 100.0 * 5.0);
    }

    let memory = snapshot.memory_percent().unwrap_or(0.0);
    if memory > 70.0 {
        score -= f64::min(25.0, (memory - 70.0) / 30.0 * 25.0);
    }

    let hit_rate = snapshot.cache_hit_rate().unwrap_or(100.0);
    if hit_rate < 80.0 {
        score -= f64::min(20.0, (80.0 - hit_rate) / 80.0 * 20.0);
    }

    let error_rate = snapshot.error_rate().unwrap_or(0.0);
    if error_rate > 1.0 {
        score -= f64::min(25.0, error_rate * 5.0);
    }

    score.clamp(0.0, 100.0)
}

/// Human-readable advice for the current snapshot, without duplicates
pub fn recommendations(snapshot: &MetricsSnapshot, thresholds: &PerformanceThresholds) -> Vec<String> {
    let mut advice = Vec::new();

    for issue in detect_issues(snapshot, thresholds) {
        advice.push(recommendation_for(issue.kind).to_string());
    }

    let cache = &snapshot.cache;
    if cache.max_size > 0 && cache.size * 10 >= cache.max_size * 9 {
        advice.push("Cache is close to capacity; consider raising cache.max_size".to_string());
    }

    let pool = &snapshot.connection_pool;
    if pool.timeouts > 0 {
        advice.push("Connection acquisitions are timing out; consider raising connection_pool.size".to_string());
    }

    let tasks = &snapshot.tasks;
    if tasks.queue_capacity > 0 && tasks.queued * 10 >= tasks.queue_capacity * 8 {
        advice.push("Task queue is nearly full; consider more workers or a larger queue".to_string());
    }
    if tasks.completed + tasks.failed > 0 && tasks.success_rate < 90.0 {
        advice.push("Many background tasks are failing; check task error logs".to_string());
    }

    let mut seen = std::collections::HashSet::new();
    advice.retain(|item| seen.insert(item.clone()));
    advice
}

pub fn recommendation_for(kind: IssueKind) -> &'static str {
    match kind {
        IssueKind::HighResponseTime => "Response times are high; review slow endpoints and enable response caching",
        IssueKind::HighMemoryUsage => "Memory usage is high; reduce cache size or retention windows",
        IssueKind::HighCpuUsage => "CPU usage is high; reduce worker count or offload heavy tasks",
        IssueKind::LowCacheHitRate => "Cache hit rate is low; review cache keys and TTLs",
        IssueKind::HighErrorRate => "Connection error rate is high; check upstream stability and pool sizing",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            system: Some(SystemSnapshot {
                cpu_percent: 10.0,
                memory_percent: 40.0,
                memory_used_mb: 400.0,
                memory_available_mb: 600.0,
                timestamp: Utc::now(),
                available: true,
            }),
            status: HealthLevel::Healthy,
            cache: CacheStats {
                max_size: 1000,
                ..CacheStats::default()
            },
            connection_pool: PoolStats {
                success_rate: 100.0,
                ..PoolStats::default()
            },
            tasks: TaskQueueStats::default(),
            monitor: MonitorStats::default(),
        }
    }

    #[test]
    fn test_quiet_snapshot_has_no_issues() {
        let snapshot = snapshot();
        let thresholds = PerformanceThresholds::default();

        assert!(detect_issues(&snapshot, &thresholds).is_empty());
        assert_eq!(performance_score(&snapshot), 100.0);
        assert!(recommendations(&snapshot, &thresholds).is_empty());
    }

    #[test]
    fn test_low_hit_rate_needs_requests() {
        let mut snapshot = snapshot();
        let thresholds = PerformanceThresholds::default();

        snapshot.cache.hit_rate_percent = 0.0;
        assert!(detect_issues(&snapshot, &thresholds).is_empty());

        snapshot.cache.total_requests = 10;
        snapshot.cache.hits = 2;
        snapshot.cache.hit_rate_percent = 20.0;
        let issues = detect_issues(&snapshot, &thresholds);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::LowCacheHitRate);
    }

    #[test]
    fn test_memory_and_error_rate_issues() {
        let mut snapshot = snapshot();
        if let Some(system) = snapshot.system.as_mut() {
            system.memory_percent = 90.0;
        }
        snapshot.connection_pool.total_requests = 20;
        snapshot.connection_pool.failed_requests = 4;
        snapshot.connection_pool.success_rate = 80.0;

        let kinds: Vec<IssueKind> = detect_issues(&snapshot, &PerformanceThresholds::default())
            .into_iter()
            .map(|issue| issue.kind)
            .collect();
        assert_eq!(kinds, vec![IssueKind::HighMemoryUsage, IssueKind::HighErrorRate]);
    }

    #[test]
    fn test_unavailable_system_is_ignored() {
        let mut snapshot = snapshot();
        if let Some(system) = snapshot.system.as_mut() {
            system.memory_percent = 99.0;
            system.available = false;
        }
        assert!(detect_issues(&snapshot, &PerformanceThresholds::default()).is_empty());
    }

    #[test]
    fn test_score_deductions() {
        let mut snapshot = snapshot();
        if let Some(system) = snapshot.system.as_mut() {
            system.memory_percent = 85.0;
        }
        // (85 - 70) / 30 * 25
        assert!((performance_score(&snapshot) - 87.5).abs() < 1e-9);

        snapshot.connection_pool.total_requests = 10;
        snapshot.connection_pool.avg_response_time_ms = 5000.0;
        snapshot.connection_pool.success_rate = 0.0;
        snapshot.cache.total_requests = 10;
        snapshot.cache.hit_rate_percent = 0.0;
        // every category at its cap
        assert!((performance_score(&snapshot) - (100.0 - 30.0 - 12.5 - 20.0 - 25.0)).abs() < 1e-9);
    }

    #[test]
    fn test_recommendations_deduplicated() {
        let mut snapshot = snapshot();
        snapshot.cache.total_requests = 5;
        snapshot.cache.hit_rate_percent = 10.0;
        snapshot.cache.size = 100;
        snapshot.cache.max_size = 100;
        snapshot.connection_pool.timeouts = 3;

        let advice = recommendations(&snapshot, &PerformanceThresholds::default());
        assert_eq!(advice.len(), 3);
        assert_eq!(advice[0], recommendation_for(IssueKind::LowCacheHitRate));
    }
}
