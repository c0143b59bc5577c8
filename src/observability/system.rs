//! System resource sampling

use std::sync::{Arc, Mutex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;
use crate::performance::lock;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// CPU and memory utilisation at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_mb: f64,
    pub memory_available_mb: f64,
    pub timestamp: DateTime<Utc>,
    /// False when the platform could not be sampled; all readings are zero
    pub available: bool,
}

impl SystemSnapshot {
    pub fn unavailable() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_used_mb: 0.0,
            memory_available_mb: 0.0,
            timestamp: Utc::now(),
            available: false,
        }
    }
}

/// Source of system snapshots
pub trait ResourceSampler: Send {
    fn sample(&mut self) -> SystemSnapshot;
}

/// Reads CPU and memory usage through `sysinfo`
pub struct SysinfoSampler {
    system: System,
}

impl std::fmt::Debug for SysinfoSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoSampler").finish()
    }
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; prime the first one
        system.refresh_cpu();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&mut self) -> SystemSnapshot {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return SystemSnapshot::unavailable();
        }

        self.system.refresh_cpu();
        self.system.refresh_memory();

        let total = self.system.total_memory() as f64;
        if total <= 0.0 {
            return SystemSnapshot::unavailable();
        }
        let used = self.system.used_memory() as f64;
        let available = self.system.available_memory() as f64;

        SystemSnapshot {
            cpu_percent: f64::from(self.system.global_cpu_info().cpu_usage()).clamp(0.0, 100.0),
            memory_percent: (used / total * 100.0).clamp(0.0, 100.0),
            memory_used_mb: used / BYTES_PER_MB,
            memory_available_mb: available / BYTES_PER_MB,
            timestamp: Utc::now(),
            available: true,
        }
    }
}

/// Sampler returning readings set by the caller.
///
/// Clones share the same readings, so a host or test can keep a handle and
/// adjust what the monitor sees.
#[derive(Debug, Clone)]
pub struct ManualSampler {
    readings: Arc<Mutex<(f64, f64)>>,
}

impl ManualSampler {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            readings: Arc::new(Mutex::new((cpu_percent, memory_percent))),
        }
    }

    pub fn set(&self, cpu_percent: f64, memory_percent: f64) {
        *lock(&self.readings) = (cpu_percent, memory_percent);
    }
}

impl ResourceSampler for ManualSampler {
    fn sample(&mut self) -> SystemSnapshot {
        let (cpu_percent, memory_percent) = *lock(&self.readings);
        SystemSnapshot {
            cpu_percent,
            memory_percent,
            memory_used_mb: memory_percent * 10.0,
            memory_available_mb: (100.0 - memory_percent) * 10.0,
            timestamp: Utc::now(),
            available: true,
        }
    }
}

/// Sampler for platforms without resource information
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableSampler;

impl ResourceSampler for UnavailableSampler {
    fn sample(&mut self) -> SystemSnapshot {
        SystemSnapshot::unavailable()
    }
}
