//! Injectable diagnostics sink.
//!
//! Every component that can fail soft takes an `Arc<dyn Diagnostics>` at
//! construction. Failures collapsed to `None` or an empty result at the public
//! boundary are always reported here first, with the original cause.

use std::sync::Arc;

use parking_lot::Mutex;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    /// Fine-grained tracing.
    Trace,
    /// Debugging information.
    Debug,
    /// Notable but expected condition.
    Notice,
    /// Recoverable problem.
    Warning,
    /// Failure that collapsed an operation's result.
    Error,
}

/// Sink for diagnostics emitted by the engine.
pub trait Diagnostics: Send + Sync {
    /// Record a message.
    fn log(&self, level: DiagnosticLevel, message: &str);

    /// Record a failure together with its cause.
    fn error(&self, error: &dyn std::error::Error, message: &str) {
        self.log(DiagnosticLevel::Error, &format!("{message}: {error}"));
    }

    /// Record a violated programmer assertion.
    fn assertion_failure(&self, message: &str) {
        self.log(DiagnosticLevel::Error, &format!("assertion failed: {message}"));
    }
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn log(&self, level: DiagnosticLevel, message: &str) {
        match level {
            DiagnosticLevel::Trace => tracing::trace!(target: "ormfetch", "{message}"),
            DiagnosticLevel::Debug => tracing::debug!(target: "ormfetch", "{message}"),
            DiagnosticLevel::Notice => tracing::info!(target: "ormfetch", "{message}"),
            DiagnosticLevel::Warning => tracing::warn!(target: "ormfetch", "{message}"),
            DiagnosticLevel::Error => tracing::error!(target: "ormfetch", "{message}"),
        }
    }

    fn error(&self, error: &dyn std::error::Error, message: &str) {
        tracing::error!(target: "ormfetch", error = %error, "{message}");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {
    fn log(&self, _level: DiagnosticLevel, _message: &str) {}
}

/// A recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    /// Severity.
    pub level: DiagnosticLevel,
    /// Rendered message, including the cause for errors.
    pub message: String,
}

/// Keeps every diagnostic in memory. Intended for tests.
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    records: Mutex<Vec<DiagnosticRecord>>,
}

impl RecordingDiagnostics {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records.lock().clone()
    }

    /// Whether any record at `level` contains `needle`.
    pub fn contains(&self, level: DiagnosticLevel, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| r.level == level && r.message.contains(needle))
    }

    /// Number of records at `level`.
    pub fn count(&self, level: DiagnosticLevel) -> usize {
        self.records.lock().iter().filter(|r| r.level == level).count()
    }

    /// Drop everything recorded so far.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn log(&self, level: DiagnosticLevel, message: &str) {
        self.records.lock().push(DiagnosticRecord {
            level,
            message: message.to_string(),
        });
    }
}

/// The default sink: `tracing`.
pub fn default_diagnostics() -> Arc<dyn Diagnostics> {
    Arc::new(TracingDiagnostics)
}
