//! The leveled log + progress interface that operation steps report through.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Severity of a [`StateSink`] message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational.
    Info,
    /// Something unexpected but recoverable.
    Warning,
    /// A failure.
    Error,
}

/// Receives messages and progress events from long-running work.
///
/// Every method must return quickly and must never fail the caller.
pub trait StateSink: Send + Sync {
    /// Emit a message at `level`.
    fn log(&self, level: LogLevel, message: &str);

    /// Report a new completion fraction in `[0, 1]`.
    fn progress(&self, alpha: f64);

    /// The work is waiting on something outside its control.
    fn pause_progress(&self) {}

    /// The work resumed after [`pause_progress`](Self::pause_progress).
    fn resume_progress(&self) {}

    /// Emit an info message.
    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Emit a warning.
    fn warn(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    /// Emit an error message.
    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// A sink that only writes to the `tracing` log and drops progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl StateSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Warning => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
    }

    fn progress(&self, _alpha: f64) {}
}
