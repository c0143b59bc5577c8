//! Metric samples, counters, gauges and the system sampling loop

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::config::MonitorConfig;
use crate::error::{PerfError, PerfResult};
use crate::performance::lock;
use super::health::{ComponentHealth, HealthLevel, HealthThresholds};
use super::system::{ResourceSampler, SysinfoSampler, SystemSnapshot};

const HISTOGRAM_WINDOW: usize = 1000;

fn metric_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").ok())
        .as_ref()
}

fn validate_name(name: &str) -> PerfResult<()> {
    match metric_name_pattern() {
        Some(pattern) if pattern.is_match(name) => Ok(()),
        _ => Err(PerfError::invalid_argument("name", format!("invalid metric name '{}'", name))),
    }
}

/// One recorded observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub total_samples: u64,
    pub uptime_seconds: f64,
    pub last_collection: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub series_count: usize,
}

/// Rolling window of observations used for summaries
#[derive(Debug, Default)]
struct Histogram {
    samples: VecDeque<f64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn observe(&mut self, value: f64) {
        self.samples.push_back(value);
        if self.samples.len() > HISTOGRAM_WINDOW {
            self.samples.pop_front();
        }
        self.sum += value;
        self.count += 1;
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((p / 100.0) * sorted.len() as f64) as usize;
        sorted[index.min(sorted.len() - 1)]
    }

    fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }
    }
}

struct CollectorInner {
    history_size: usize,
    cpu_thresholds: HealthThresholds,
    memory_thresholds: HealthThresholds,
    series: Mutex<HashMap<String, VecDeque<MetricSample>>>,
    counters: Mutex<BTreeMap<String, u64>>,
    gauges: Mutex<BTreeMap<String, f64>>,
    histograms: Mutex<BTreeMap<String, Histogram>>,
    latest: Mutex<Option<SystemSnapshot>>,
    sampler: Mutex<Box<dyn ResourceSampler>>,
    total_samples: AtomicU64,
    started_at: Instant,
}

impl CollectorInner {
    fn record(&self, name: &str, value: f64, unit: &str) -> PerfResult<()> {
        validate_name(name)?;
        if !value.is_finite() {
            return Err(PerfError::invalid_argument("value", format!("metric '{}' must be finite", name)));
        }

        let mut series = lock(&self.series);
        let samples = series.entry(name.to_string()).or_default();

        // Keep each series strictly increasing in time
        let mut timestamp = Utc::now();
        if let Some(last) = samples.back() {
            if timestamp <= last.timestamp {
                timestamp = last.timestamp + chrono::Duration::microseconds(1);
            }
        }

        samples.push_back(MetricSample {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
            timestamp,
        });
        while samples.len() > self.history_size {
            samples.pop_front();
        }

        self.total_samples.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn sample_system(&self) -> SystemSnapshot {
        let snapshot = lock(&self.sampler).sample();

        if snapshot.available {
            let readings = [
                ("cpu_percent", snapshot.cpu_percent, "percent"),
                ("memory_percent", snapshot.memory_percent, "percent"),
                ("memory_used_mb", snapshot.memory_used_mb, "MB"),
                ("memory_available_mb", snapshot.memory_available_mb, "MB"),
            ];
            for (name, value, unit) in readings {
                if let Err(e) = self.record(name, value, unit) {
                    warn!(metric = name, error = %e, "Dropped system sample");
                }
            }
        } else {
            debug!("System metrics unavailable on this platform");
        }

        *lock(&self.latest) = Some(snapshot.clone());
        snapshot
    }

    fn current_status(&self) -> HealthLevel {
        match lock(&self.latest).as_ref() {
            Some(snapshot) if snapshot.available => self
                .cpu_thresholds
                .classify(snapshot.cpu_percent)
                .worst(self.memory_thresholds.classify(snapshot.memory_percent)),
            _ => HealthLevel::Healthy,
        }
    }
}

/// Records named observations and samples system resources on an interval.
///
/// Each series keeps the most recent `history_size` samples, oldest first,
/// with strictly increasing timestamps.
pub struct MetricsCollector {
    inner: Arc<CollectorInner>,
    interval: Duration,
    background: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("interval", &self.interval)
            .field("history_size", &self.inner.history_size)
            .field("is_running", &self.is_running())
            .finish()
    }
}

impl MetricsCollector {
    pub fn new(config: &MonitorConfig) -> Self {
        Self::with_sampler(config, Box::new(SysinfoSampler::new()))
    }

    pub fn with_sampler(config: &MonitorConfig, sampler: Box<dyn ResourceSampler>) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                history_size: config.history_size.max(1),
                cpu_thresholds: HealthThresholds::new(config.cpu_warning_percent, config.cpu_critical_percent),
                memory_thresholds: HealthThresholds::new(
                    config.memory_warning_percent,
                    config.memory_critical_percent,
                ),
                series: Mutex::new(HashMap::new()),
                counters: Mutex::new(BTreeMap::new()),
                gauges: Mutex::new(BTreeMap::new()),
                histograms: Mutex::new(BTreeMap::new()),
                latest: Mutex::new(None),
                sampler: Mutex::new(sampler),
                total_samples: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
            interval: config.collection_interval(),
            background: Mutex::new(None),
        }
    }

    /// Append a sample to the named series
    pub fn record(&self, name: &str, value: f64, unit: &str) -> PerfResult<()> {
        self.inner.record(name, value, unit)
    }

    /// Read CPU and memory usage and append them as samples
    pub fn sample_system(&self) -> SystemSnapshot {
        self.inner.sample_system()
    }

    /// The most recent `n` samples for `name`, oldest first
    pub fn recent(&self, name: &str, n: usize) -> Vec<MetricSample> {
        lock(&self.inner.series)
            .get(name)
            .map(|samples| {
                let skip = samples.len().saturating_sub(n);
                samples.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn latest_value(&self, name: &str) -> Option<f64> {
        lock(&self.inner.series)
            .get(name)
            .and_then(|samples| samples.back())
            .map(|sample| sample.value)
    }

    pub fn series_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.series).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn latest_snapshot(&self) -> Option<SystemSnapshot> {
        lock(&self.inner.latest).clone()
    }

    /// Worse of the CPU and memory levels from the latest snapshot
    pub fn current_status(&self) -> HealthLevel {
        self.inner.current_status()
    }

    pub fn increment_counter(&self, name: &str, amount: u64) {
        if validate_name(name).is_err() {
            warn!(metric = name, "Ignoring counter with invalid name");
            return;
        }
        *lock(&self.inner.counters).entry(name.to_string()).or_insert(0) += amount;
    }

    pub fn counter(&self, name: &str) -> u64 {
        lock(&self.inner.counters).get(name).copied().unwrap_or(0)
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        if validate_name(name).is_err() || !value.is_finite() {
            warn!(metric = name, value, "Ignoring invalid gauge update");
            return;
        }
        lock(&self.inner.gauges).insert(name.to_string(), value);
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        lock(&self.inner.gauges).get(name).copied()
    }

    /// Record an operation duration in seconds
    pub fn observe_duration(&self, name: &str, duration: Duration) {
        if validate_name(name).is_err() {
            warn!(metric = name, "Ignoring histogram with invalid name");
            return;
        }
        lock(&self.inner.histograms)
            .entry(name.to_string())
            .or_default()
            .observe(duration.as_secs_f64());
    }

    /// Export counters, gauges and duration summaries in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        for (name, value) in lock(&self.inner.counters).iter() {
            output.push_str(&format!("# HELP {} Total count of {}\n", name, name));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        for (name, value) in lock(&self.inner.gauges).iter() {
            output.push_str(&format!("# HELP {} Current value of {}\n", name, name));
            output.push_str(&format!("# TYPE {} gauge\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        for (name, histogram) in lock(&self.inner.histograms).iter() {
            output.push_str(&format!("# HELP {}_seconds Duration of {}\n", name, name));
            output.push_str(&format!("# TYPE {}_seconds summary\n", name));
            output.push_str(&format!("{}_seconds{{quantile=\"0.5\"}} {:.6}\n", name, histogram.percentile(50.0)));
            output.push_str(&format!("{}_seconds{{quantile=\"0.95\"}} {:.6}\n", name, histogram.percentile(95.0)));
            output.push_str(&format!("{}_seconds_sum {:.6}\n", name, histogram.sum));
            output.push_str(&format!("{}_seconds_count {}\n", name, histogram.count));
        }

        let stats = self.stats();
        output.push_str("# HELP monitor_uptime_seconds Monitor uptime\n");
        output.push_str("# TYPE monitor_uptime_seconds gauge\n");
        output.push_str(&format!("monitor_uptime_seconds {:.3}\n", stats.uptime_seconds));

        output
    }

    /// Average of the rolling duration window, in seconds
    pub fn average_duration(&self, name: &str) -> Option<f64> {
        lock(&self.inner.histograms).get(name).map(|h| h.average())
    }

    pub fn stats(&self) -> MonitorStats {
        let series = lock(&self.inner.series);
        let last_collection = series
            .get("cpu_percent")
            .and_then(|samples| samples.back())
            .map(|sample| sample.timestamp);

        MonitorStats {
            total_samples: self.inner.total_samples.load(Ordering::Relaxed),
            uptime_seconds: self.inner.started_at.elapsed().as_secs_f64(),
            last_collection,
            is_running: self.is_running(),
            series_count: series.len(),
        }
    }

    pub fn health_check(&self) -> ComponentHealth {
        let health = match self.current_status() {
            HealthLevel::Healthy => ComponentHealth::healthy("monitor"),
            HealthLevel::Warning => ComponentHealth::warning("monitor", "resource usage elevated"),
            HealthLevel::Critical => ComponentHealth::critical("monitor", "resource usage critical"),
        };

        match self.latest_snapshot() {
            Some(snapshot) => health
                .with_metadata("cpu_percent", &format!("{:.1}", snapshot.cpu_percent))
                .with_metadata("memory_percent", &format!("{:.1}", snapshot.memory_percent)),
            None => health,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.background).is_some()
    }

    /// Spawn the sampling loop. No-op if it is already running.
    pub fn start(&self) {
        let mut background = lock(&self.background);
        if background.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let interval = self.interval;
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = inner.sample_system();
                        debug!(
                            cpu_percent = snapshot.cpu_percent,
                            memory_percent = snapshot.memory_percent,
                            "Collected system metrics"
                        );
                    }
                }
            }
        });

        *background = Some((token, handle));
        info!(interval_ms = interval.as_millis() as u64, "Metrics collection started");
    }

    /// Stop the sampling loop and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let background = lock(&self.background).take();
        if let Some((token, handle)) = background {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Metrics loop exited abnormally");
            }
            info!("Metrics collection stopped");
        }
    }
}

impl Drop for MetricsCollector {
    fn drop(&mut self) {
        if let Some((token, _)) = lock(&self.background).take() {
            token.cancel();
        }
    }
}
