//! Unified error type.

use http::StatusCode;

/// A boxed application error, as raised by user middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by tsu's fallible operations.
///
/// Middleware returns `Result<(), Error>`. An error travels back up the chain
/// untouched: tracing wrappers close their spans and hand it on as-is, so the
/// outermost middleware (or the server) decides what the client sees.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Binding to a port or accepting a connection failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The instrumentation was built without a usable APM client.
    #[error("invalid APM client: {0}")]
    InvalidClient(&'static str),

    /// A framework extension point the instrumentation must patch is missing.
    #[error("{0} extension point is not available, middleware tracing cannot be installed")]
    FrameworkUnavailable(&'static str),

    /// `render` was called but no renderer is set under that name.
    #[error("render method `{0}` is not set on this context")]
    RenderUnavailable(String),

    /// A middleware asked for a specific HTTP status, like Koa's `ctx.throw`.
    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },

    /// Any other failure raised by application code.
    #[error(transparent)]
    Handler(BoxError),
}

impl Error {
    /// An error that the server answers with `status`.
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into() }
    }

    /// Wraps an application error.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    /// The HTTP status the server responds with when this error escapes the chain.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
