//! Error tiers.
//!
//! Request-scoped failures are [`HandlerError`]s: the wrapper always turns
//! them into exactly one reply. Process-scoped failures are [`Fatal`]: the
//! shutdown coordinator turns them into an exit code. The two never mix.

use std::fmt;

use crate::shutdown::ExitCode;

/// Boxed error used for user-supplied hooks and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Message used when a failure carries none.
pub const DEFAULT_ERROR_MESSAGE: &str = "Unknown error occurred";

// ── Request tier ──────────────────────────────────────────────────────────────

/// A failure raised inside a wrapped handler.
///
/// Any error type converts into it with `?`, carrying its `Display` text as
/// the message and no status (so the reply defaults to 500). Use the
/// constructors to pick a status explicitly:
///
/// ```rust
/// use tortilla::HandlerError;
///
/// let err = HandlerError::not_found("no such user");
/// assert_eq!(err.envelope().status, 404);
/// ```
#[derive(Debug, Default)]
pub struct HandlerError {
    status: Option<u16>,
    message: Option<String>,
    source: Option<BoxError>,
}

impl HandlerError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), message: Some(message.into()), source: None }
    }

    /// An error with neither status nor message. Replies `500` with
    /// [`DEFAULT_ERROR_MESSAGE`].
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Reduces the error to what gets sent back, filling in defaults.
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            status: self.status.unwrap_or(500),
            message: self
                .message
                .clone()
                .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_owned()),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let envelope = self.envelope();
        write!(f, "{} ({})", envelope.message, envelope.status)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self {
            status: None,
            message: Some(err.to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// The status and message derived from a caught [`HandlerError`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorEnvelope {
    pub status: u16,
    pub message: String,
}

/// Failure to write a reply onto a response.
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("a reply was already sent for this request")]
    AlreadySent,

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("failed to serialise payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ── Infrastructure ────────────────────────────────────────────────────────────

/// The error type returned by tortilla's fallible infrastructure operations:
/// binding, configuration, middleware and lifecycle hooks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("invalid definition: {0}")]
    Definition(String),

    #[error("middleware `{name}` failed: {message}")]
    Middleware { name: String, message: String },

    #[error("{hook} hook failed: {source}")]
    Hook {
        hook: &'static str,
        #[source]
        source: BoxError,
    },
}

impl Error {
    pub fn middleware(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Middleware { name: name.into(), message: message.into() }
    }
}

// ── Process tier ──────────────────────────────────────────────────────────────

/// A failure outside request scope. Always ends the process.
#[derive(Debug, thiserror::Error)]
pub enum Fatal {
    /// Raised before the server started listening.
    #[error("startup failed: {0}")]
    Startup(#[source] Error),

    /// Escaped every request boundary while serving.
    #[error("uncaught error: {0}")]
    Uncaught(String),
}

impl Fatal {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Startup(_) => ExitCode::StartFailed,
            Self::Uncaught(_) => ExitCode::UncaughtError,
        }
    }
}
