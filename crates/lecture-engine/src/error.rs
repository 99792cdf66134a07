use std::fmt;

use manifest::ManifestError;
use reqwest::StatusCode;

use crate::remux::MuxError;
use crate::session::SessionError;

/// Failure category used by the retry table and the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    ResolutionExhausted,
    ManifestParseError,
    RenderTimeout,
    StaleContent,
    TransferError,
    MuxUnavailable,
    MuxFailed,
    Io,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolutionExhausted => "resolution_exhausted",
            Self::ManifestParseError => "manifest_parse_error",
            Self::RenderTimeout => "render_timeout",
            Self::StaleContent => "stale_content",
            Self::TransferError => "transfer_error",
            Self::MuxUnavailable => "mux_unavailable",
            Self::MuxFailed => "mux_failed",
            Self::Io => "io",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LectureError {
    #[error("cancelled")]
    Cancelled,

    #[error("no strategy could resolve a stream for lecture {lecture}")]
    ResolutionExhausted { lecture: String },

    #[error("manifest at {url} is unusable: {source}")]
    Manifest {
        url: String,
        #[source]
        source: ManifestError,
    },

    #[error("page did not render within {seconds}s after {attempts} attempts")]
    RenderTimeout { seconds: u64, attempts: u32 },

    #[error("page content kept changing while being read ({attempts} attempts)")]
    StaleContent { attempts: u32 },

    #[error("rendering session failed: {reason}")]
    Session { reason: String },

    #[error("transfer of {url} failed: {reason}")]
    Transfer {
        url: String,
        reason: String,
        retryable: bool,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error(transparent)]
    Mux(#[from] MuxError),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl LectureError {
    pub fn transfer(url: impl Into<String>, reason: impl fmt::Display, retryable: bool) -> Self {
        Self::Transfer {
            url: url.into(),
            reason: reason.to_string(),
            retryable,
        }
    }

    pub fn manifest(url: impl Into<String>, source: ManifestError) -> Self {
        Self::Manifest {
            url: url.into(),
            source,
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        let retryable = is_retryable_reqwest_error(&e);
        Self::transfer(url, e, retryable)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ResolutionExhausted { .. } => ErrorKind::ResolutionExhausted,
            Self::Manifest { .. } => ErrorKind::ManifestParseError,
            Self::RenderTimeout { .. } => ErrorKind::RenderTimeout,
            Self::StaleContent { .. } => ErrorKind::StaleContent,
            // A session that fails outright leaves nothing to resolve from.
            Self::Session { .. } => ErrorKind::ResolutionExhausted,
            Self::Transfer { .. } | Self::HttpStatus { .. } => ErrorKind::TransferError,
            Self::Mux(MuxError::Unavailable { .. }) => ErrorKind::MuxUnavailable,
            Self::Mux(_) => ErrorKind::MuxFailed,
            Self::Io { .. } | Self::Config { .. } => ErrorKind::Io,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transfer { retryable, .. } => *retryable,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::RenderTimeout { .. } | Self::StaleContent { .. } => true,
            _ => false,
        }
    }
}

impl From<SessionError> for LectureError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Timeout { seconds } => Self::RenderTimeout {
                seconds,
                attempts: 1,
            },
            SessionError::Stale => Self::StaleContent { attempts: 1 },
            SessionError::Other(reason) => Self::Session { reason },
        }
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
/// Non-retryable: redirect and builder errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}
