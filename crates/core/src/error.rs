//! Error types for field extraction and record construction.
//!
//! These errors are deliberately narrow: they cover the translation from
//! whatever JSON the backend serves into typed records. Transport and
//! protocol failures live in the client crate.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while turning backend JSON into domain records.
#[derive(Error, Debug)]
pub enum Error {
    /// The record is missing the configured identifier field.
    #[error("record is missing required field '{field}'")]
    MissingField { field: String },

    /// The configured freshness field was present but not a parseable timestamp.
    #[error("could not parse freshness timestamp: {raw}")]
    InvalidTimestamp { raw: String },

    /// The value had the wrong overall shape (e.g. not a JSON object).
    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },
}

impl Error {
    /// Create a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create an invalid timestamp error.
    pub fn invalid_timestamp(raw: impl Into<String>) -> Self {
        Self::InvalidTimestamp { raw: raw.into() }
    }

    /// Create an invalid record error.
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }
}
