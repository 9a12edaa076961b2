//! Logging for the recovery engine.
//!
//! Two concerns live here:
//! - process-wide subscriber setup ([`init_logging`]), writing to stderr and
//!   honouring `RUST_LOG`
//! - the [`Logger`] collaborator the engine reports escalations and executor
//!   faults through, so embedders can route them to their own sink

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::{fmt as subscriber_fmt, EnvFilter};

/// Structured fields attached to a log event.
pub type LogFields = Map<String, Value>;

/// Verbosity of the process-wide subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    /// Disable logging entirely
    Off,
}

impl LogLevel {
    fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl From<u8> for LogLevel {
    /// 0 = Info, 1 = Debug, 2+ = Trace
    fn from(verbosity: u8) -> Self {
        match verbosity {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Configuration for the process-wide subscriber.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Prefix each line with a timestamp. Off when the host adds its own.
    pub with_timestamps: bool,
    /// Include the module path of each event
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamps: true,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Creates the default configuration: info level, timestamps and targets on.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fallback level used when `RUST_LOG` is absent.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Enables or disables timestamps.
    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.with_timestamps = enabled;
        self
    }

    /// Enables or disables the module path on each line.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Create a configuration from verbosity level (0 = info, 1 = debug, 2+ = trace).
    pub fn from_verbosity(verbosity: u8) -> Self {
        Self::default().with_level(LogLevel::from(verbosity))
    }

    fn env_filter(&self) -> EnvFilter {
        if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(self.level.as_directive())
        }
    }
}

/// Installs the global tracing subscriber.
///
/// Returns an error if a global subscriber is already set, which lets test
/// binaries and embedding services call this without coordinating.
///
/// ```no_run
/// use mender::logging::{init_logging, LoggingConfig, LogLevel};
///
/// init_logging(LoggingConfig::new().with_level(LogLevel::Debug)).ok();
/// ```
pub fn init_logging(
    config: LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let subscriber = subscriber_fmt::Subscriber::builder()
        .with_env_filter(config.env_filter())
        .with_writer(std::io::stderr)
        .with_target(config.with_target);

    if config.with_timestamps {
        subscriber.try_init()
    } else {
        subscriber.without_time().try_init()
    }
}

/// Severity of an event sent through the [`Logger`] collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventLevel::Debug => "debug",
            EventLevel::Info => "info",
            EventLevel::Warning => "warning",
            EventLevel::Error => "error",
            EventLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Sink for the engine's externally visible log events.
pub trait Logger: Send + Sync {
    /// Records one event with its structured fields.
    fn log(&self, level: EventLevel, message: &str, fields: &LogFields);
}

/// Forwards events to `tracing`. `Critical` is emitted at ERROR with `critical = true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: EventLevel, message: &str, fields: &LogFields) {
        let fields = Value::Object(fields.clone());
        match level {
            EventLevel::Debug => tracing::debug!(fields = %fields, "{}", message),
            EventLevel::Info => tracing::info!(fields = %fields, "{}", message),
            EventLevel::Warning => tracing::warn!(fields = %fields, "{}", message),
            EventLevel::Error => tracing::error!(fields = %fields, "{}", message),
            EventLevel::Critical => {
                tracing::error!(critical = true, fields = %fields, "{}", message)
            }
        }
    }
}

/// One event captured by [`MemoryLogger`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: EventLevel,
    pub message: String,
    pub fields: LogFields,
}

/// Keeps every event in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemoryLogger {
    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries recorded at exactly `level`.
    pub fn entries_at(&self, level: EventLevel) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }

    /// Drops every recorded entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: EventLevel, message: &str, fields: &LogFields) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogEntry {
                level,
                message: message.to_string(),
                fields: fields.clone(),
            });
    }
}
