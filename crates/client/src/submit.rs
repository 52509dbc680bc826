//! Idempotent command submission and response classification.
//!
//! The submitter sends one command and classifies the answer; it never
//! retries on its own. A retry here could double-submit a write the server
//! already accepted, so retry policy belongs to the caller, which knows
//! whether the idempotency token makes a resend safe.

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use tally_core::{FieldMap, WriteIntent};

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Classified result of one command submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The command side accepted the write (or replayed a previously
    /// accepted identical one); the acknowledgement body is carried as-is.
    Accepted(Value),
    /// The idempotency token was already used with a different payload.
    /// The body is still parsed and carried as the prior outcome.
    DuplicateConflict(Value),
    /// The command was not accepted.
    Rejected {
        /// HTTP status, when a response was received at all.
        status: Option<u16>,
        /// Server-supplied or transport-level reason.
        reason: String,
        /// Whether resending the same command may succeed.
        retryable: bool,
    },
}

impl Outcome {
    /// Whether the write was accepted.
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The acknowledgement body, for accepted or conflicting outcomes.
    pub const fn ack(&self) -> Option<&Value> {
        match self {
            Self::Accepted(ack) | Self::DuplicateConflict(ack) => Some(ack),
            Self::Rejected { .. } => None,
        }
    }
}

/// Submits commands to the write side.
#[derive(Debug, Clone)]
pub struct WriteSubmitter {
    http: reqwest::Client,
    base: Url,
    fields: FieldMap,
}

impl WriteSubmitter {
    /// Create a submitter for the configured command service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no command base URL is configured and
    /// [`Error::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::transport(e.to_string()))?;

        Ok(Self {
            http,
            base: config.command_base()?.clone(),
            fields: config.fields.clone(),
        })
    }

    /// Submit one command and classify the response.
    ///
    /// Status conventions: success is `Accepted`, the conflict status is
    /// `DuplicateConflict`, other 4xx are non-retryable rejections, and
    /// 5xx plus transport failures are retryable rejections.
    ///
    /// # Errors
    ///
    /// `Err` is reserved for local problems (invalid URL); everything the
    /// server answered, including rejections, is an `Ok(Outcome)`.
    pub async fn submit(&self, intent: &WriteIntent) -> Result<Outcome> {
        let url = self.base.join(&intent.path)?;

        let mut body = intent.payload.clone();
        body.insert(self.fields.token.clone(), Value::from(intent.token.clone()));

        debug!(path = %intent.path, token = %intent.token, "submitting command");

        let response = match self.http.post(url).json(&Value::Object(body)).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(%e, "command transport failure");
                return Ok(Outcome::Rejected {
                    status: None,
                    reason: e.to_string(),
                    retryable: true,
                });
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return Ok(Outcome::Rejected {
                    status: Some(status.as_u16()),
                    reason: e.to_string(),
                    retryable: true,
                });
            }
        };
        let body = parse_body(&text);

        if status.is_success() {
            debug!(token = %intent.token, "command accepted");
            return Ok(Outcome::Accepted(body));
        }

        if status == reqwest::StatusCode::CONFLICT {
            info!(token = %intent.token, "idempotency token already used");
            return Ok(Outcome::DuplicateConflict(body));
        }

        let reason = self
            .fields
            .message_from_value(&body)
            .unwrap_or_else(|| format!("HTTP {status}"));
        let retryable = status.is_server_error();
        warn!(status = status.as_u16(), %reason, retryable, "command rejected");
        Ok(Outcome::Rejected {
            status: Some(status.as_u16()),
            reason,
            retryable,
        })
    }
}

/// Parse a response body as JSON, falling back to the raw text.
fn parse_body(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}
