//! Health levels and per-component health records

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime};
use serde::{Deserialize, Serialize};

/// Health level, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl HealthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLevel::Healthy => "healthy",
            HealthLevel::Warning => "warning",
            HealthLevel::Critical => "critical",
        }
    }

    /// The worse of two levels
    pub fn worst(self, other: HealthLevel) -> HealthLevel {
        self.max(other)
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Warning/critical cut-offs for a percentage reading.
///
/// A reading strictly above `warning` is a warning, strictly above
/// `critical` is critical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub warning: f64,
    pub critical: f64,
}

impl HealthThresholds {
    pub fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    pub fn classify(&self, value: f64) -> HealthLevel {
        if value > self.critical {
            HealthLevel::Critical
        } else if value > self.warning {
            HealthLevel::Warning
        } else {
            HealthLevel::Healthy
        }
    }
}

/// Health status of an individual component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub level: HealthLevel,
    pub message: Option<String>,
    /// Unix seconds of the check
    pub last_checked: u64,
    pub metadata: BTreeMap<String, String>,
}

impl ComponentHealth {
    fn with_level(name: &str, level: HealthLevel) -> Self {
        Self {
            name: name.to_string(),
            level,
            message: None,
            last_checked: SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn healthy(name: &str) -> Self {
        Self::with_level(name, HealthLevel::Healthy)
    }

    pub fn warning(name: &str, message: &str) -> Self {
        Self::with_level(name, HealthLevel::Warning).with_message(message)
    }

    pub fn critical(name: &str, message: &str) -> Self {
        Self::with_level(name, HealthLevel::Critical).with_message(message)
    }

    /// Component switched off by configuration
    pub fn disabled(name: &str) -> Self {
        Self::healthy(name)
            .with_message("disabled")
            .with_metadata("enabled", "false")
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.level == HealthLevel::Healthy
    }
}

/// Overall health, the worst level among its components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub level: HealthLevel,
    pub components: Vec<ComponentHealth>,
    pub issues: Vec<String>,
}

impl HealthReport {
    pub fn from_components(components: Vec<ComponentHealth>) -> Self {
        let level = components
            .iter()
            .fold(HealthLevel::Healthy, |acc, c| acc.worst(c.level));

        let issues = components
            .iter()
            .filter(|c| !c.is_healthy())
            .map(|c| match &c.message {
                Some(message) => format!("{}: {}", c.name, message),
                None => format!("{}: {}", c.name, c.level),
            })
            .collect();

        Self { level, components, issues }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}
