//! Error types for the performance layer

use std::sync::Arc;
use thiserror::Error;

/// Main error type for the performance layer
#[derive(Debug, Clone, Error)]
pub enum PerfError {
    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    #[error("{resource} not found: {id}")]
    NotFound {
        resource: String,
        id: String,
    },

    #[error("Task {task_id} is not ready (status: {status})")]
    NotReady {
        task_id: String,
        status: String,
    },

    #[error("Task {task_id} failed: {message}")]
    TaskFailed {
        task_id: String,
        message: String,
        /// The error returned by the payload, kept intact for downcasting
        error: Arc<anyhow::Error>,
    },

    #[error("Task {task_id} was cancelled")]
    TaskCancelled { task_id: String },

    #[error("Capacity exceeded: {resource} is full ({capacity} slots)")]
    CapacityExceeded {
        resource: String,
        capacity: usize,
    },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: String,
    },

    #[error("Invalid argument: {message}")]
    InvalidArgument {
        message: String,
        field: String,
    },

    #[error("Network error: {source}")]
    Network {
        source: NetworkError,
        context: String,
    },

    #[error("{component} is shutting down")]
    ShuttingDown { component: String },

    #[error("{component} is not running")]
    NotRunning { component: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("I/O error: {message}")]
    Io { message: String },
}

/// Network-specific error types
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request failed: {message}")]
    RequestFailed { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Connection pool is closed")]
    PoolClosed,
}

impl PerfError {
    /// Whether the caller may reasonably retry the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PerfError::Timeout { .. }
                | PerfError::NotReady { .. }
                | PerfError::CapacityExceeded { .. }
                | PerfError::Network {
                    source: NetworkError::ConnectionFailed { .. },
                    ..
                }
        )
    }

    pub fn timeout(operation: &str, duration: std::time::Duration) -> Self {
        PerfError::Timeout {
            operation: operation.to_string(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn configuration(field: &str, message: impl Into<String>) -> Self {
        PerfError::Configuration {
            message: message.into(),
            field: field.to_string(),
        }
    }

    pub fn invalid_argument(field: &str, message: impl Into<String>) -> Self {
        PerfError::InvalidArgument {
            message: message.into(),
            field: field.to_string(),
        }
    }

    /// Wrap a failed task payload, keeping the full context chain in the message
    pub fn task_failed(task_id: &str, error: Arc<anyhow::Error>) -> Self {
        PerfError::TaskFailed {
            task_id: task_id.to_string(),
            message: format!("{:#}", error),
            error,
        }
    }
}

impl From<NetworkError> for PerfError {
    fn from(err: NetworkError) -> Self {
        PerfError::Network {
            source: err,
            context: String::new(),
        }
    }
}

impl From<serde_json::Error> for PerfError {
    fn from(err: serde_json::Error) -> Self {
        PerfError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for PerfError {
    fn from(err: std::io::Error) -> Self {
        PerfError::Io {
            message: err.to_string(),
        }
    }
}

/// Type alias for the main result type used throughout the library
pub type PerfResult<T> = Result<T, PerfError>;

/// Logging configuration and initialization
pub mod logging {
    use std::env;
    use std::str::FromStr;
    use tracing::Level;
    use tracing_subscriber::fmt::{self, format::FmtSpan, writer::BoxMakeWriter};
    use tracing_subscriber::{prelude::*, EnvFilter};
    use super::{PerfError, PerfResult};

    /// Logging output format
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LogFormat {
        Human,
        Json,
    }

    impl FromStr for LogFormat {
        type Err = PerfError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "human" | "text" => Ok(LogFormat::Human),
                "json" => Ok(LogFormat::Json),
                other => Err(PerfError::configuration(
                    "PERFLAYER_LOG_FORMAT",
                    format!("Unknown log format '{}', expected json or human", other),
                )),
            }
        }
    }

    /// Logging output destination
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LogOutput {
        Stdout,
        Stderr,
    }

    impl FromStr for LogOutput {
        type Err = PerfError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "stdout" => Ok(LogOutput::Stdout),
                "stderr" => Ok(LogOutput::Stderr),
                other => Err(PerfError::configuration(
                    "PERFLAYER_LOG_OUTPUT",
                    format!("Unknown log output '{}', expected stdout or stderr", other),
                )),
            }
        }
    }

    /// Logging configuration
    #[derive(Debug, Clone, PartialEq)]
    pub struct LoggingConfig {
        /// Level for the `perflayer` target
        pub level: Level,
        pub format: LogFormat,
        pub output: LogOutput,
        /// Extra `EnvFilter` directives such as `tokio=debug`
        pub directives: Vec<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                format: LogFormat::Human,
                output: LogOutput::Stderr,
                directives: Vec::new(),
            }
        }
    }

    impl LoggingConfig {
        /// Read `PERFLAYER_LOG_LEVEL`, `PERFLAYER_LOG_FORMAT`, `PERFLAYER_LOG_OUTPUT`
        /// and `PERFLAYER_LOG_FILTER` (comma separated directives)
        pub fn from_env() -> PerfResult<Self> {
            Self::from_lookup(|key| env::var(key).ok())
        }

        pub fn from_lookup<F>(lookup: F) -> PerfResult<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let mut config = Self::default();

            if let Some(level) = lookup("PERFLAYER_LOG_LEVEL") {
                config.level = level.trim().parse().map_err(|_| {
                    PerfError::configuration("PERFLAYER_LOG_LEVEL", format!("Unknown log level '{}'", level))
                })?;
            }
            if let Some(format) = lookup("PERFLAYER_LOG_FORMAT") {
                config.format = format.parse()?;
            }
            if let Some(output) = lookup("PERFLAYER_LOG_OUTPUT") {
                config.output = output.parse()?;
            }
            if let Some(filter) = lookup("PERFLAYER_LOG_FILTER") {
                config.directives = filter
                    .split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(String::from)
                    .collect();
            }

            Ok(config)
        }

        /// Crate level first, noisy dependencies capped, then user directives.
        /// `RUST_LOG` still applies on top.
        pub fn env_filter(&self) -> PerfResult<EnvFilter> {
            let level = self.level.to_string().to_ascii_lowercase();
            let mut filter = EnvFilter::builder()
                .with_default_directive(Level::WARN.into())
                .from_env_lossy();

            let defaults = [format!("perflayer={}", level), "tokio=info".to_string(), "sysinfo=warn".to_string()];
            for directive in defaults.iter().chain(self.directives.iter()) {
                let parsed = directive.parse().map_err(|e| {
                    PerfError::configuration("PERFLAYER_LOG_FILTER", format!("Bad directive '{}': {}", directive, e))
                })?;
                filter = filter.add_directive(parsed);
            }
            Ok(filter)
        }
    }

    /// Install the global subscriber.
    ///
    /// Fails with a configuration error if a subscriber is already installed
    /// or a directive does not parse.
    pub fn init_logging(config: LoggingConfig) -> PerfResult<()> {
        let writer = match config.output {
            LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        };
        let layer = fmt::layer().with_writer(writer).with_target(true).with_thread_ids(true);
        let registry = tracing_subscriber::registry().with(config.env_filter()?);

        let installed = match config.format {
            LogFormat::Human => registry.with(layer.with_file(true).with_line_number(true)).try_init(),
            LogFormat::Json => registry
                .with(layer.json().with_current_span(true).with_span_events(FmtSpan::CLOSE))
                .try_init(),
        };
        installed.map_err(|e| PerfError::configuration("logging", format!("Logging already initialized: {}", e)))
    }

    /// Initialize logging from `PERFLAYER_LOG_*` variables
    pub fn init_from_env() -> PerfResult<()> {
        init_logging(LoggingConfig::from_env()?)
    }

}
