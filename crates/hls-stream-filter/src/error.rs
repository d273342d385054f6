//! Crate-level error type.
//!
//! Every fallible operation in the crate returns [`HlsResult`]. Variants stay
//! small and string-based so concrete HTTP client errors never leak into the
//! public API.

use std::io;

/// Result type used by this crate.
pub type HlsResult<T> = Result<T, HlsError>;

/// Unified error type for the `hls-stream-filter` crate.
#[derive(Debug, thiserror::Error)]
pub enum HlsError {
    /// A generic error with a message.
    #[error("{0}")]
    Message(String),

    /// The playlist text is malformed in a way that cannot be skipped.
    #[error("invalid playlist: {0}")]
    InvalidPlaylist(String),

    /// The playlist uses a feature this filter does not handle (e.g. encryption).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Operation was cancelled (session teardown).
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP request failed.
    #[error("HTTP error: {status} for {url}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// URL that failed.
        url: String,
    },

    /// Request timed out.
    #[error("request timeout for {0}")]
    Timeout(String),

    /// A URI could not be parsed or resolved.
    #[error("invalid url: {0}")]
    UrlParse(#[from] url::ParseError),

    /// A meta playlist produced no usable variant.
    #[error("no variants available in meta playlist")]
    NoVariants,

    /// The selected variant has no segments to play.
    #[error("playlist has no segments")]
    NoSegments,

    /// Seek was requested on a stream that currently refuses seeking.
    #[error("stream is not seekable at this point")]
    NotSeekable,

    /// Extra context around a lower-level error.
    #[error("{context}: {source}")]
    Context {
        /// What we were doing when the error occurred.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: Box<HlsError>,
    },
}

impl HlsError {
    /// Convenience helper to construct a simple message error.
    pub fn msg(msg: impl Into<String>) -> Self {
        HlsError::Message(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        HlsError::InvalidPlaylist(msg.into())
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        HlsError::Timeout(url.into())
    }

    /// Attach static context to an existing error.
    pub fn with_context(self, context: &'static str) -> Self {
        HlsError::Context {
            context,
            source: Box::new(self),
        }
    }

    /// Returns true if this error (or the error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            HlsError::Cancelled => true,
            HlsError::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Returns true if this error (or the error it wraps) is `Unsupported`.
    pub fn is_unsupported(&self) -> bool {
        match self {
            HlsError::Unsupported(_) => true,
            HlsError::Context { source, .. } => source.is_unsupported(),
            _ => false,
        }
    }
}

impl From<HlsError> for io::Error {
    fn from(e: HlsError) -> Self {
        match e {
            HlsError::Io(inner) => inner,
            HlsError::NotSeekable | HlsError::Unsupported(_) => {
                io::Error::new(io::ErrorKind::Unsupported, e)
            }
            HlsError::Timeout(_) => io::Error::new(io::ErrorKind::TimedOut, e),
            HlsError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, e),
            other => io::Error::other(other),
        }
    }
}
