//! Run log: the human-readable progress trail that ends up in the final report.
//!
//! Components receive a `&dyn RunObserver` instead of writing to a shared
//! global, so the flow and the controller can be tested with their own log.

use std::sync::Mutex;

/// Severity of a run log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Step,
    Info,
    Success,
    Warn,
    Error,
}

impl LogLevel {
    fn marker(self) -> &'static str {
        match self {
            LogLevel::Step => "🔹",
            LogLevel::Info => "ℹ️",
            LogLevel::Success => "✅",
            LogLevel::Warn => "⚠️",
            LogLevel::Error => "❌",
        }
    }
}

/// Receives progress lines from the auth flow and the run controller.
pub trait RunObserver: Send + Sync {
    fn record(&self, level: LogLevel, message: &str);

    fn step(&self, message: &str) {
        self.record(LogLevel::Step, message);
    }

    fn info(&self, message: &str) {
        self.record(LogLevel::Info, message);
    }

    fn success(&self, message: &str) {
        self.record(LogLevel::Success, message);
    }

    fn warn(&self, message: &str) {
        self.record(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.record(LogLevel::Error, message);
    }
}

/// Collects run log lines in memory and mirrors them to `tracing`.
#[derive(Debug, Default)]
pub struct RunLog {
    lines: Mutex<Vec<String>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last `n` lines, oldest first, joined with newlines.
    pub fn recent(&self, n: usize) -> String {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl RunObserver for RunLog {
    fn record(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => tracing::error!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            _ => tracing::info!("{message}"),
        }
        let line = format!("{} {message}", level.marker());
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line);
    }
}
