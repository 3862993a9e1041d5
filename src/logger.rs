use std::fmt;
use std::sync::Arc;

/// Severity of a diagnostic message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    /// Highest severity. Recorded like [`Level::Error`]; never terminates the process.
    Fatal,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Leveled sink for client diagnostics.
///
/// Injected per client with [`ResilientClient::with_logger`], so tests can
/// substitute a collecting implementation without touching global state.
///
/// [`ResilientClient::with_logger`]: crate::ResilientClient::with_logger
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }

    fn fatal(&self, message: &str) {
        self.log(Level::Fatal, message);
    }
}

/// Discards every message.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: Level, _message: &str) {}
}

/// Forwards messages to the `tracing` macros under the `resilient_http` target.
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

#[cfg(feature = "tracing")]
impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::Debug => tracing::debug!(target: "resilient_http", "{message}"),
            Level::Info => tracing::info!(target: "resilient_http", "{message}"),
            Level::Warn => tracing::warn!(target: "resilient_http", "{message}"),
            Level::Error => tracing::error!(target: "resilient_http", "{message}"),
            Level::Fatal => tracing::error!(target: "resilient_http", fatal = true, "{message}"),
        }
    }
}

/// Logger used by clients that were not given one explicitly.
#[cfg(feature = "tracing")]
pub(crate) fn default_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn default_logger() -> Arc<dyn Logger> {
    Arc::new(NoopLogger)
}
