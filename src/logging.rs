//! Log sink for backend process output
//!
//! The supervisor never writes backend output to the console directly. Every
//! captured line goes through a [`LogSink`], so production code can forward to
//! `tracing` while tests capture events in memory and assert on them.

use parking_lot::Mutex;
use tracing::{error, info};

/// Severity of a captured line
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Standard output and lifecycle events
    Info,
    /// Standard error and spawn failures
    Error,
}

/// A single captured log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Script identifier the line came from
    pub source: String,
    pub level: LogLevel,
    pub text: String,
}

/// Destination for backend process output
pub trait LogSink: Send + Sync {
    fn log_line(&self, source: &str, level: LogLevel, text: &str);
}

/// Forwards lines to `tracing` under the `toolgate::backend` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log_line(&self, source: &str, level: LogLevel, text: &str) {
        match level {
            LogLevel::Info => info!(target: "toolgate::backend", source, "{}: {}", source, text),
            LogLevel::Error => error!(target: "toolgate::backend", source, "{} error: {}", source, text),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Events from one source, in arrival order
    pub fn events_from(&self, source: &str) -> Vec<LogEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.source == source)
            .cloned()
            .collect()
    }

    pub fn contains(&self, source: &str, level: LogLevel, needle: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.source == source && e.level == level && e.text.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log_line(&self, source: &str, level: LogLevel, text: &str) {
        self.events.lock().push(LogEvent {
            source: source.to_string(),
            level,
            text: text.to_string(),
        });
    }
}
