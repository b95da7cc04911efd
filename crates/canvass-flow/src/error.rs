//! Error types for canvass-flow

use thiserror::Error;

/// Result type alias using canvass-flow Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a conversation turn.
///
/// Every variant carries a stable machine-readable code and an HTTP-ish
/// status for callers that sit behind a web layer. Display strings never
/// interpolate raw provider output; provider detail is only reachable
/// through `source()`.
#[derive(Error, Debug)]
pub enum Error {
    /// A required state field was missing before a stage could run
    #[error("validation error: {0}")]
    Validation(String),

    /// Every provider in the fallback chain was exhausted
    #[error("generation provider unavailable, please try again shortly")]
    Provider {
        #[source]
        source: canvass_ai::Error,
    },

    /// Structured output never matched the expected schema, even after repair
    #[error("generated output could not be validated")]
    OutputFormat {
        #[source]
        source: canvass_ai::Error,
    },

    /// A turn referenced a conversation with no prior initialization
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Checkpoint read/write failed after bounded retries
    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),
}

impl Error {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Provider { .. } => "provider_error",
            Error::OutputFormat { .. } => "output_format_error",
            Error::SessionNotFound(_) => "session_not_found",
            Error::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// HTTP status equivalent for web-facing callers
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::SessionNotFound(_) => 404,
            Error::Provider { .. } => 502,
            Error::OutputFormat { .. } => 500,
            Error::StoreUnavailable(_) => 503,
        }
    }
}

impl From<canvass_ai::Error> for Error {
    fn from(e: canvass_ai::Error) -> Self {
        match e {
            canvass_ai::Error::OutputFormat(_) => Error::OutputFormat { source: e },
            _ => Error::Provider { source: e },
        }
    }
}
