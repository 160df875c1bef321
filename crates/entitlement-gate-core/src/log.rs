// crates/entitlement-gate-core/src/log.rs
// ============================================================================
// Module: Entitlement Gate Logging
// Description: Structured JSON-line log events and sinks.
// Purpose: Emit operational events without a hard logging dependency.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Log events are flat JSON objects with an event label, a millisecond
//! timestamp, a level, a message, and free-form fields. Sinks decide where the
//! line goes; [`GateLog`] filters by level and stamps events. Deployments route
//! the JSON lines to whatever pipeline they prefer.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Degraded but recoverable.
    Warn,
    /// Operation failed.
    Error,
}

impl LogLevel {
    /// Returns the lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured log event payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateLogEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Additional structured fields.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

impl GateLogEvent {
    /// Creates a new log event with a consistent timestamp.
    #[must_use]
    pub fn new(
        event: &'static str,
        level: LogLevel,
        message: impl Into<String>,
        fields: &[(&str, Value)],
    ) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event,
            timestamp_ms,
            level,
            message: message.into(),
            fields: fields.iter().map(|(key, value)| ((*key).to_string(), value.clone())).collect(),
        }
    }

    /// Returns a field value by key.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for log events.
pub trait GateLogSink: Send + Sync {
    /// Record a log event.
    fn record(&self, event: &GateLogEvent);
}

/// Sink that writes JSON lines to stderr.
pub struct StderrLogSink;

impl GateLogSink for StderrLogSink {
    fn record(&self, event: &GateLogEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Sink that appends JSON lines to a file.
pub struct FileLogSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileLogSink {
    /// Opens the log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl GateLogSink for FileLogSink {
    fn record(&self, event: &GateLogEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Sink that discards events.
pub struct NoopLogSink;

impl GateLogSink for NoopLogSink {
    fn record(&self, _event: &GateLogEvent) {}
}

/// Sink that keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    /// Captured events in arrival order.
    events: Mutex<Vec<GateLogEvent>>,
}

impl MemoryLogSink {
    /// Creates an empty in-memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the captured events.
    #[must_use]
    pub fn events(&self) -> Vec<GateLogEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns captured events with the given label.
    #[must_use]
    pub fn events_named(&self, event: &str) -> Vec<GateLogEvent> {
        self.events().into_iter().filter(|entry| entry.event == event).collect()
    }
}

impl GateLogSink for MemoryLogSink {
    fn record(&self, event: &GateLogEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

// ============================================================================
// SECTION: Handle
// ============================================================================

/// Cloneable logging handle with level filtering.
#[derive(Clone)]
pub struct GateLog {
    /// Destination sink.
    sink: Arc<dyn GateLogSink>,
    /// Events below this level are dropped.
    min_level: LogLevel,
}

impl GateLog {
    /// Creates a handle over `sink` that records events at or above `min_level`.
    #[must_use]
    pub fn new(sink: Arc<dyn GateLogSink>, min_level: LogLevel) -> Self {
        Self {
            sink,
            min_level,
        }
    }

    /// Creates a handle that discards everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopLogSink), LogLevel::Error)
    }

    /// Records an event at `level`.
    pub fn emit(
        &self,
        level: LogLevel,
        event: &'static str,
        message: &str,
        fields: &[(&str, Value)],
    ) {
        if level < self.min_level {
            return;
        }
        self.sink.record(&GateLogEvent::new(event, level, message, fields));
    }

    /// Records a debug event.
    pub fn debug(&self, event: &'static str, message: &str, fields: &[(&str, Value)]) {
        self.emit(LogLevel::Debug, event, message, fields);
    }

    /// Records an info event.
    pub fn info(&self, event: &'static str, message: &str, fields: &[(&str, Value)]) {
        self.emit(LogLevel::Info, event, message, fields);
    }

    /// Records a warning event.
    pub fn warn(&self, event: &'static str, message: &str, fields: &[(&str, Value)]) {
        self.emit(LogLevel::Warn, event, message, fields);
    }

    /// Records an error event.
    pub fn error(&self, event: &'static str, message: &str, fields: &[(&str, Value)]) {
        self.emit(LogLevel::Error, event, message, fields);
    }
}

impl fmt::Debug for GateLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateLog").field("min_level", &self.min_level).finish_non_exhaustive()
    }
}
