//! Per-request logger capability.
//!
//! Handlers never reach for a global logger. Each request carries its own
//! [`Logger`], attached by the first middleware in the chain and handed to
//! the handler through its [`Context`](crate::Context).
//!
//! Every method has a no-op default, so a logger that only cares about
//! errors implements `error` and nothing else:
//!
//! ```rust
//! use tortilla::Logger;
//!
//! struct ErrorsOnly;
//!
//! impl Logger for ErrorsOnly {
//!     fn error(&self, message: &str) {
//!         eprintln!("{message}");
//!     }
//! }
//! ```

use std::error::Error as StdError;
use std::sync::Arc;

use uuid::Uuid;

/// The logger contract exposed to handlers and middleware.
pub trait Logger: Send + Sync + 'static {
    fn debug(&self, _message: &str) {}
    fn log(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}

    /// Logs `message` together with the error that caused it. Loggers that
    /// keep structured fields override this; the default folds `err` into
    /// the message.
    fn error_with(&self, message: &str, err: &(dyn StdError + 'static)) {
        self.error(&format!("{message}: {err}"));
    }
}

/// Shared handle to a request's logger.
pub type SharedLogger = Arc<dyn Logger>;

/// A logger that discards everything. Used when nothing was attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {}

impl NoopLogger {
    pub fn shared() -> SharedLogger {
        Arc::new(Self)
    }
}

/// Forwards to `tracing`, tagging every event with a request id when it
/// belongs to one.
#[derive(Clone, Debug)]
pub struct TracingLogger {
    request_id: Option<String>,
}

impl TracingLogger {
    /// A request logger with a fresh v4 request id.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(request_id: impl Into<String>) -> Self {
        Self { request_id: Some(request_id.into()) }
    }

    /// A logger for process-level events (startup, shutdown).
    pub fn process() -> Self {
        Self { request_id: None }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(request_id = self.request_id(), "{message}");
    }

    fn log(&self, message: &str) {
        tracing::info!(request_id = self.request_id(), "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(request_id = self.request_id(), "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(request_id = self.request_id(), "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(request_id = self.request_id(), "{message}");
    }

    fn error_with(&self, message: &str, err: &(dyn StdError + 'static)) {
        tracing::error!(request_id = self.request_id(), error = err, "{message}");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::Logger;

    /// Captures every call as `(level, message)` for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingLogger {
        pub(crate) lines: Mutex<Vec<(&'static str, String)>>,
    }

    impl RecordingLogger {
        pub(crate) fn lines(&self) -> Vec<(&'static str, String)> {
            self.lines.lock().unwrap().clone()
        }

        pub(crate) fn has(&self, level: &str, needle: &str) -> bool {
            self.lines()
                .iter()
                .any(|(l, m)| *l == level && m.contains(needle))
        }

        fn push(&self, level: &'static str, message: &str) {
            self.lines.lock().unwrap().push((level, message.to_owned()));
        }
    }

    impl Logger for RecordingLogger {
        fn debug(&self, message: &str) { self.push("debug", message) }
        fn log(&self, message: &str) { self.push("log", message) }
        fn info(&self, message: &str) { self.push("info", message) }
        fn warn(&self, message: &str) { self.push("warn", message) }
        fn error(&self, message: &str) { self.push("error", message) }
    }
}
