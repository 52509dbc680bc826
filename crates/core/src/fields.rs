//! Configurable mapping from backend field names to domain fields.
//!
//! The backend is free to name its identifier `transfer_id`, `account_id`,
//! or anything else; rather than probing several candidate names on every
//! response, the caller supplies one [`FieldMap`] at construction and every
//! extraction goes through it.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{EntityKey, EntityRecord};

/// Field names used to extract domain data from backend JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    /// Field holding the entity identifier.
    #[serde(default = "default_key_field")]
    pub key: String,

    /// Field holding the status value.
    #[serde(default = "default_status_field")]
    pub status: String,

    /// Field holding the freshness timestamp.
    #[serde(default = "default_updated_at_field")]
    pub updated_at: String,

    /// Field the idempotency token is written under in command bodies.
    #[serde(default = "default_token_field")]
    pub token: String,

    /// Ordered list of fields probed for a server-supplied error message.
    #[serde(default = "default_message_fields")]
    pub message: Vec<String>,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self::for_transfers()
    }
}

impl FieldMap {
    /// Field names served by the transfer projection.
    pub fn for_transfers() -> Self {
        Self {
            key: default_key_field(),
            status: default_status_field(),
            updated_at: default_updated_at_field(),
            token: default_token_field(),
            message: default_message_fields(),
        }
    }

    /// Field names served by the account projection.
    pub fn for_accounts() -> Self {
        Self {
            key: "account_id".into(),
            ..Self::for_transfers()
        }
    }

    /// Override the identifier field.
    #[must_use]
    pub fn key_field(mut self, name: impl Into<String>) -> Self {
        self.key = name.into();
        self
    }

    /// Override the status field.
    #[must_use]
    pub fn status_field(mut self, name: impl Into<String>) -> Self {
        self.status = name.into();
        self
    }

    /// Override the freshness timestamp field.
    #[must_use]
    pub fn updated_at_field(mut self, name: impl Into<String>) -> Self {
        self.updated_at = name.into();
        self
    }

    /// Override the idempotency token field.
    #[must_use]
    pub fn token_field(mut self, name: impl Into<String>) -> Self {
        self.token = name.into();
        self
    }

    /// Build an [`EntityRecord`] from a backend JSON value.
    ///
    /// The identifier is required; status and freshness are optional. A
    /// freshness field that is present but not a parseable timestamp is an
    /// error rather than silently losing the ordering signal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] for non-object values,
    /// [`Error::MissingField`] when the identifier is absent, and
    /// [`Error::InvalidTimestamp`] for malformed freshness values.
    pub fn record_from_value(&self, value: Value) -> Result<EntityRecord> {
        let Value::Object(fields) = value else {
            return Err(Error::invalid_record("expected a JSON object"));
        };

        let key = fields
            .get(&self.key)
            .and_then(Value::as_str)
            .map(EntityKey::new)
            .ok_or_else(|| Error::missing_field(&self.key))?;

        let status = fields
            .get(&self.status)
            .and_then(Value::as_str)
            .map(str::to_owned);

        let updated_at = match fields.get(&self.updated_at) {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(parse_timestamp(raw)?),
            Some(other) => return Err(Error::invalid_timestamp(other.to_string())),
        };

        Ok(EntityRecord {
            key,
            status,
            updated_at,
            fields,
        })
    }

    /// Probe the configured message fields for a server-supplied error text.
    pub fn message_from_value(&self, value: &Value) -> Option<String> {
        let obj = value.as_object()?;
        self.message
            .iter()
            .find_map(|name| obj.get(name).and_then(Value::as_str))
            .map(str::to_owned)
    }
}

/// Parse an RFC 3339 timestamp, tolerating the offset-less form some
/// backends serialize local datetimes into.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::invalid_timestamp(raw))
}

fn default_key_field() -> String {
    "transfer_id".into()
}

fn default_status_field() -> String {
    "status".into()
}

fn default_updated_at_field() -> String {
    "updated_at".into()
}

fn default_token_field() -> String {
    "idempotencyKey".into()
}

fn default_message_fields() -> Vec<String> {
    vec!["message".into(), "error".into(), "detail".into()]
}
