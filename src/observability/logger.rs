//! # Migration Logger
//!
//! MANIFESTO ALIGNMENT: Every batch, warning and phase boundary is logged
//! with an explicit structured payload.
//!
//! # Design Principles
//!
//! 1. **Injected**: the logger is a collaborator handed to the migration, never global
//! 2. **Structured**: every event carries a JSON payload next to its message
//! 3. **Non-blocking**: logging never fails a migration
//!
//! [`TracingLogger`] is the default. It forwards events to `tracing`, so it
//! is silent unless the embedding process installs a subscriber.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

/// Logger contract consumed by migrations
pub trait MigrationLogger: Send + Sync {
    /// Progress and phase events
    fn info(&self, payload: &Value, message: &str);

    /// Non-fatal diagnostics (slow counts, idempotency mismatches)
    fn warn(&self, payload: &Value, message: &str);
}

/// Forwards events to the `tracing` ecosystem
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl MigrationLogger for TracingLogger {
    fn info(&self, payload: &Value, message: &str) {
        tracing::info!(target: "bulk_data_migration", payload = %payload, "{}", message);
    }

    fn warn(&self, payload: &Value, message: &str) {
        tracing::warn!(target: "bulk_data_migration", payload = %payload, "{}", message);
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl MigrationLogger for NoopLogger {
    fn info(&self, _payload: &Value, _message: &str) {}

    fn warn(&self, _payload: &Value, _message: &str) {}
}

/// Log event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
}

/// A captured log event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub payload: Value,
    pub message: String,
}

/// Keeps every event in memory, in emission order
#[derive(Debug, Default)]
pub struct RecordingLogger {
    events: Mutex<Vec<LogEvent>>,
}

impl RecordingLogger {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, level: LogLevel, payload: &Value, message: &str) {
        let mut events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        events.push(LogEvent {
            level,
            payload: payload.clone(),
            message: message.to_string(),
        });
    }

    /// All captured events
    pub fn events(&self) -> Vec<LogEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Captured warnings
    pub fn warnings(&self) -> Vec<LogEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == LogLevel::Warn)
            .collect()
    }

    /// Payloads of every event carrying `message`
    pub fn payloads_for(&self, message: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|event| event.message == message)
            .map(|event| event.payload)
            .collect()
    }

    /// Forget everything captured so far
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl MigrationLogger for RecordingLogger {
    fn info(&self, payload: &Value, message: &str) {
        self.record(LogLevel::Info, payload, message);
    }

    fn warn(&self, payload: &Value, message: &str) {
        self.record(LogLevel::Warn, payload, message);
    }
}
