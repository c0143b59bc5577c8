//! Configuration management for the performance layer

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use crate::error::{PerfError, PerfResult};

/// Preset that scales every component together.
///
/// `Minimal` keeps the resource footprint small, `Aggressive` trades memory
/// for throughput and a larger cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    Minimal,
    #[default]
    Balanced,
    Aggressive,
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizationLevel::Minimal => "minimal",
            OptimizationLevel::Balanced => "balanced",
            OptimizationLevel::Aggressive => "aggressive",
        };
        f.write_str(name)
    }
}

impl FromStr for OptimizationLevel {
    type Err = PerfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(OptimizationLevel::Minimal),
            "balanced" => Ok(OptimizationLevel::Balanced),
            "aggressive" => Ok(OptimizationLevel::Aggressive),
            other => Err(PerfError::configuration(
                "optimization_level",
                format!("unknown optimization level '{}'", other),
            )),
        }
    }
}

/// Main configuration for the performance layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizationConfig {
    pub optimization_level: OptimizationLevel,
    pub features: FeatureFlags,
    pub cache: CacheConfig,
    pub connection_pool: ConnectionPoolConfig,
    pub async_processor: AsyncProcessorConfig,
    pub monitor: MonitorConfig,
    pub optimizer: OptimizerConfig,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self::for_level(OptimizationLevel::Balanced)
    }
}

/// Which components are started. A disabled component is replaced by its
/// stand-in so callers never branch on availability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureFlags {
    pub caching: bool,
    pub connection_pooling: bool,
    pub async_processing: bool,
    pub performance_monitoring: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            caching: true,
            connection_pooling: true,
            async_processing: true,
            performance_monitoring: true,
        }
    }
}

impl FeatureFlags {
    pub fn all_disabled() -> Self {
        Self {
            caching: false,
            connection_pooling: false,
            async_processing: false,
            performance_monitoring: false,
        }
    }
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries before eviction kicks in
    pub max_size: usize,
    /// TTL in seconds used when `set` omits one
    pub default_ttl: f64,
    /// Share of capacity evicted at once when the cache is full
    pub eviction_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: 3600.0,
            eviction_fraction: 0.1,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.default_ttl)
    }
}

/// Connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    /// Maximum concurrent connections
    pub size: usize,
    /// Attempts made to open a session before giving up
    pub max_retries: u32,
    /// Acquire timeout in seconds
    pub timeout: f64,
    /// Idle age in seconds after which a session is retired
    pub max_idle_time: f64,
    /// Uses after which a session is retired
    pub max_uses: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            max_retries: 3,
            timeout: 30.0,
            max_idle_time: 300.0,
            max_uses: 1000,
        }
    }
}

impl ConnectionPoolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs_f64(self.max_idle_time)
    }
}

/// Task queue / worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AsyncProcessorConfig {
    pub max_workers: usize,
    /// Bounded queue depth; `submit` waits once it is reached
    pub queue_size: usize,
    /// Finished task records retained for status queries
    pub history_size: usize,
    /// Seconds granted to in-flight work during shutdown
    pub drain_timeout: f64,
}

impl Default for AsyncProcessorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            queue_size: 100,
            history_size: 1000,
            drain_timeout: 10.0,
        }
    }
}

impl AsyncProcessorConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.drain_timeout)
    }
}

/// Resource monitor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sampling cadence in seconds
    pub collection_interval: f64,
    /// Samples retained per metric
    pub history_size: usize,
    pub cpu_warning_percent: f64,
    pub cpu_critical_percent: f64,
    pub memory_warning_percent: f64,
    pub memory_critical_percent: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            collection_interval: 60.0,
            history_size: 1000,
            cpu_warning_percent: 70.0,
            cpu_critical_percent: 90.0,
            memory_warning_percent: 80.0,
            memory_critical_percent: 95.0,
        }
    }
}

impl MonitorConfig {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs_f64(self.collection_interval)
    }
}

/// Thresholds evaluated by the optimization cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceThresholds {
    pub response_time_ms: f64,
    pub memory_usage_percent: f64,
    pub cpu_usage_percent: f64,
    pub cache_hit_rate_percent: f64,
    pub error_rate_percent: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            response_time_ms: 2000.0,
            memory_usage_percent: 80.0,
            cpu_usage_percent: 80.0,
            cache_hit_rate_percent: 70.0,
            error_rate_percent: 5.0,
        }
    }
}

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    pub auto_optimization: bool,
    /// Seconds between optimization cycles
    pub interval: f64,
    /// Optimization records kept for inspection
    pub history_size: usize,
    /// Share of the cache dropped when memory pressure is detected
    pub aggressive_eviction_fraction: f64,
    pub thresholds: PerformanceThresholds,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            auto_optimization: true,
            interval: 300.0,
            history_size: 100,
            aggressive_eviction_fraction: 0.25,
            thresholds: PerformanceThresholds::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }
}

impl OptimizationConfig {
    /// Build the preset configuration for an optimization level
    pub fn for_level(level: OptimizationLevel) -> Self {
        let mut config = Self {
            optimization_level: level,
            features: FeatureFlags::default(),
            cache: CacheConfig::default(),
            connection_pool: ConnectionPoolConfig::default(),
            async_processor: AsyncProcessorConfig::default(),
            monitor: MonitorConfig::default(),
            optimizer: OptimizerConfig::default(),
        };
        config.apply_level(level);
        config
    }

    /// Rescale the sized settings to match `level`
    pub fn apply_level(&mut self, level: OptimizationLevel) {
        self.optimization_level = level;
        match level {
            OptimizationLevel::Minimal => {
                self.cache.max_size = 100;
                self.cache.default_ttl = 1800.0;
                self.connection_pool.size = 5;
                self.async_processor.max_workers = 2;
                self.async_processor.queue_size = 50;
                self.monitor.collection_interval = 300.0;
            }
            OptimizationLevel::Balanced => {
                self.cache.max_size = 1000;
                self.cache.default_ttl = 3600.0;
                self.connection_pool.size = 10;
                self.async_processor.max_workers = 4;
                self.async_processor.queue_size = 100;
                self.monitor.collection_interval = 60.0;
            }
            OptimizationLevel::Aggressive => {
                self.cache.max_size = 5000;
                self.cache.default_ttl = 7200.0;
                self.connection_pool.size = 20;
                self.async_processor.max_workers = 8;
                self.async_processor.queue_size = 500;
                self.monitor.collection_interval = 30.0;
            }
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> PerfResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PerfError::configuration("config_file", format!("Failed to read config file: {}", e))
        })?;

        let config: OptimizationConfig = toml::from_str(&content).map_err(|e| {
            PerfError::configuration("config_format", format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> PerfResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            PerfError::configuration("config_serialization", format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content).map_err(|e| {
            PerfError::configuration("config_write", format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Build configuration from `PERFLAYER_*` environment variables.
    ///
    /// The level preset is applied first so individual variables override it.
    pub fn from_env() -> PerfResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> PerfResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let level = match lookup("PERFLAYER_OPTIMIZATION_LEVEL") {
            Some(value) => value.parse()?,
            None => OptimizationLevel::Balanced,
        };
        let mut config = Self::for_level(level);

        override_with(&lookup, "PERFLAYER_CACHE_MAX_SIZE", &mut config.cache.max_size)?;
        override_with(&lookup, "PERFLAYER_CACHE_DEFAULT_TTL", &mut config.cache.default_ttl)?;
        override_with(&lookup, "PERFLAYER_POOL_SIZE", &mut config.connection_pool.size)?;
        override_with(&lookup, "PERFLAYER_POOL_MAX_RETRIES", &mut config.connection_pool.max_retries)?;
        override_with(&lookup, "PERFLAYER_POOL_TIMEOUT", &mut config.connection_pool.timeout)?;
        override_with(&lookup, "PERFLAYER_ASYNC_MAX_WORKERS", &mut config.async_processor.max_workers)?;
        override_with(&lookup, "PERFLAYER_ASYNC_QUEUE_SIZE", &mut config.async_processor.queue_size)?;
        override_with(&lookup, "PERFLAYER_MONITOR_INTERVAL", &mut config.monitor.collection_interval)?;
        override_with(&lookup, "PERFLAYER_MONITOR_HISTORY_SIZE", &mut config.monitor.history_size)?;
        override_with(&lookup, "PERFLAYER_ENABLE_CACHING", &mut config.features.caching)?;
        override_with(&lookup, "PERFLAYER_ENABLE_CONNECTION_POOLING", &mut config.features.connection_pooling)?;
        override_with(&lookup, "PERFLAYER_ENABLE_ASYNC_PROCESSING", &mut config.features.async_processing)?;
        override_with(&lookup, "PERFLAYER_ENABLE_PERFORMANCE_MONITORING", &mut config.features.performance_monitoring)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> PerfResult<()> {
        require_nonzero(self.cache.max_size, "cache.max_size")?;
        require_positive(self.cache.default_ttl, "cache.default_ttl")?;
        require_fraction(self.cache.eviction_fraction, "cache.eviction_fraction")?;

        require_nonzero(self.connection_pool.size, "connection_pool.size")?;
        require_positive(self.connection_pool.timeout, "connection_pool.timeout")?;
        require_positive(self.connection_pool.max_idle_time, "connection_pool.max_idle_time")?;
        if self.connection_pool.max_uses == 0 {
            return Err(PerfError::configuration(
                "connection_pool.max_uses",
                "Max uses must be greater than 0",
            ));
        }

        require_nonzero(self.async_processor.max_workers, "async_processor.max_workers")?;
        require_nonzero(self.async_processor.queue_size, "async_processor.queue_size")?;
        require_nonzero(self.async_processor.history_size, "async_processor.history_size")?;
        require_positive(self.async_processor.drain_timeout, "async_processor.drain_timeout")?;

        require_positive(self.monitor.collection_interval, "monitor.collection_interval")?;
        require_nonzero(self.monitor.history_size, "monitor.history_size")?;
        require_ordered(
            self.monitor.cpu_warning_percent,
            self.monitor.cpu_critical_percent,
            "monitor.cpu_warning_percent",
        )?;
        require_ordered(
            self.monitor.memory_warning_percent,
            self.monitor.memory_critical_percent,
            "monitor.memory_warning_percent",
        )?;

        require_positive(self.optimizer.interval, "optimizer.interval")?;
        require_nonzero(self.optimizer.history_size, "optimizer.history_size")?;
        require_fraction(
            self.optimizer.aggressive_eviction_fraction,
            "optimizer.aggressive_eviction_fraction",
        )?;

        let thresholds = &self.optimizer.thresholds;
        require_positive(thresholds.response_time_ms, "optimizer.thresholds.response_time_ms")?;
        require_percent(thresholds.memory_usage_percent, "optimizer.thresholds.memory_usage_percent")?;
        require_percent(thresholds.cpu_usage_percent, "optimizer.thresholds.cpu_usage_percent")?;
        require_percent(thresholds.cache_hit_rate_percent, "optimizer.thresholds.cache_hit_rate_percent")?;
        require_percent(thresholds.error_rate_percent, "optimizer.thresholds.error_rate_percent")?;

        Ok(())
    }
}

fn override_with<F, T>(lookup: &F, key: &str, target: &mut T) -> PerfResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| {
            PerfError::configuration(key, format!("Cannot parse {}='{}'", key, raw))
        })?;
    }
    Ok(())
}

fn require_nonzero(value: usize, field: &str) -> PerfResult<()> {
    if value == 0 {
        return Err(PerfError::configuration(field, format!("{} must be greater than 0", field)));
    }
    Ok(())
}

/// Upper bound for any configured duration: 100 years
const MAX_DURATION_SECS: f64 = 100.0 * 365.0 * 24.0 * 3600.0;

fn require_positive(value: f64, field: &str) -> PerfResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(PerfError::configuration(field, format!("{} must be a positive number of seconds", field)));
    }
    // Deadlines are computed as `now + duration`, so the value must stay schedulable
    if value > MAX_DURATION_SECS || Duration::try_from_secs_f64(value).is_err() {
        return Err(PerfError::configuration(
            field,
            format!("{} must not exceed {} seconds", field, MAX_DURATION_SECS),
        ));
    }
    Ok(())
}

fn require_fraction(value: f64, field: &str) -> PerfResult<()> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(PerfError::configuration(field, format!("{} must be in (0, 1]", field)));
    }
    Ok(())
}

fn require_percent(value: f64, field: &str) -> PerfResult<()> {
    if !(0.0..=100.0).contains(&value) {
        return Err(PerfError::configuration(field, format!("{} must be within 0..=100", field)));
    }
    Ok(())
}

fn require_ordered(warning: f64, critical: f64, field: &str) -> PerfResult<()> {
    require_percent(warning, field)?;
    require_percent(critical, field)?;
    if warning > critical {
        return Err(PerfError::configuration(field, "Warning threshold must not exceed critical threshold"));
    }
    Ok(())
}
