//! Error types for the tally client.

use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the command/query backend.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection-level failure (refused, reset, DNS).
    #[error("transport failure: {reason}")]
    Transport { reason: String },

    /// An idempotency token was reused with a different payload.
    #[error("idempotency conflict: {message}")]
    Conflict { message: String },

    /// The backend rejected the command for business reasons.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A deadline expired while awaiting a terminal read state.
    #[error("still processing after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Streaming channel error.
    #[error("stream error: {reason}")]
    Stream { reason: String },

    /// Configuration error.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record extraction error from the core crate.
    #[error("record error: {0}")]
    Core(#[from] tally_core::Error),
}

impl Error {
    /// Create a transport failure error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create an idempotency conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a business rejection error.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Create a deadline expiry error.
    pub const fn timeout(elapsed_ms: u64) -> Self {
        Self::Timeout { elapsed_ms }
    }

    /// Create a stream error.
    pub fn stream(reason: impl Into<String>) -> Self {
        Self::Stream {
            reason: reason.into(),
        }
    }

    /// Create a config error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Conflicts and business rejections never are: retrying them blindly
    /// risks double-submitting a write the backend already judged.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Stream { .. } | Self::Http(_)
        )
    }
}
