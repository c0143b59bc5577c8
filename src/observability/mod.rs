//! Resource monitoring, metrics and component health

pub mod health;
pub mod metrics;
pub mod system;

pub use health::{ComponentHealth, HealthLevel, HealthReport, HealthThresholds};
pub use metrics::{MetricSample, MetricsCollector, MonitorStats};
pub use system::{ManualSampler, ResourceSampler, SysinfoSampler, SystemSnapshot, UnavailableSampler};

use std::time::Duration;
use async_trait::async_trait;
use crate::error::PerfResult;

/// Observation surface used by the coordinator and host.
///
/// [`MetricsCollector`] is the real implementation; [`DisabledMonitor`]
/// stands in when performance monitoring is switched off.
#[async_trait]
pub trait Monitor: Send + Sync {
    fn record(&self, name: &str, value: f64, unit: &str) -> PerfResult<()>;
    fn sample_system(&self) -> SystemSnapshot;
    fn recent(&self, name: &str, n: usize) -> Vec<MetricSample>;
    fn latest_snapshot(&self) -> Option<SystemSnapshot>;
    fn current_status(&self) -> HealthLevel;
    fn increment_counter(&self, name: &str, amount: u64);
    fn set_gauge(&self, name: &str, value: f64);
    fn observe_duration(&self, name: &str, duration: Duration);
    fn export_prometheus(&self) -> String;
    fn stats(&self) -> MonitorStats;
    fn health_check(&self) -> ComponentHealth;
    fn start(&self);
    async fn stop(&self);
    fn is_enabled(&self) -> bool;
}

#[async_trait]
impl Monitor for MetricsCollector {
    fn record(&self, name: &str, value: f64, unit: &str) -> PerfResult<()> {
        MetricsCollector::record(self, name, value, unit)
    }

    fn sample_system(&self) -> SystemSnapshot {
        MetricsCollector::sample_system(self)
    }

    fn recent(&self, name: &str, n: usize) -> Vec<MetricSample> {
        MetricsCollector::recent(self, name, n)
    }

    fn latest_snapshot(&self) -> Option<SystemSnapshot> {
        MetricsCollector::latest_snapshot(self)
    }

    fn current_status(&self) -> HealthLevel {
        MetricsCollector::current_status(self)
    }

    fn increment_counter(&self, name: &str, amount: u64) {
        MetricsCollector::increment_counter(self, name, amount)
    }

    fn set_gauge(&self, name: &str, value: f64) {
        MetricsCollector::set_gauge(self, name, value)
    }

    fn observe_duration(&self, name: &str, duration: Duration) {
        MetricsCollector::observe_duration(self, name, duration)
    }

    fn export_prometheus(&self) -> String {
        MetricsCollector::export_prometheus(self)
    }

    fn stats(&self) -> MonitorStats {
        MetricsCollector::stats(self)
    }

    fn health_check(&self) -> ComponentHealth {
        MetricsCollector::health_check(self)
    }

    fn start(&self) {
        MetricsCollector::start(self)
    }

    async fn stop(&self) {
        MetricsCollector::stop(self).await
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Drops every record; snapshots are zeroed and status is always healthy
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledMonitor;

#[async_trait]
impl Monitor for DisabledMonitor {
    fn record(&self, _name: &str, _value: f64, _unit: &str) -> PerfResult<()> {
        Ok(())
    }

    fn sample_system(&self) -> SystemSnapshot {
        SystemSnapshot::unavailable()
    }

    fn recent(&self, _name: &str, _n: usize) -> Vec<MetricSample> {
        Vec::new()
    }

    fn latest_snapshot(&self) -> Option<SystemSnapshot> {
        None
    }

    fn current_status(&self) -> HealthLevel {
        HealthLevel::Healthy
    }

    fn increment_counter(&self, _name: &str, _amount: u64) {}

    fn set_gauge(&self, _name: &str, _value: f64) {}

    fn observe_duration(&self, _name: &str, _duration: Duration) {}

    fn export_prometheus(&self) -> String {
        String::new()
    }

    fn stats(&self) -> MonitorStats {
        MonitorStats::default()
    }

    fn health_check(&self) -> ComponentHealth {
        ComponentHealth::disabled("monitor")
    }

    fn start(&self) {}

    async fn stop(&self) {}

    fn is_enabled(&self) -> bool {
        false
    }
}
