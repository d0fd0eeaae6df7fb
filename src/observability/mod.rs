//! # Observability
//!
//! Structured logging for migration runs.
//!
//! Migrations report progress and diagnostics through an injected
//! [`MigrationLogger`]. Nothing in the crate depends on logging succeeding,
//! and no process-wide logger state is kept.

pub mod logger;

pub use logger::{LogEvent, LogLevel, MigrationLogger, NoopLogger, RecordingLogger, TracingLogger};
