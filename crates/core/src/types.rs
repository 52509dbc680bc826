//! Domain types shared by every reconciliation component.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque identifier for a tracked entity (an account or a transfer).
///
/// Unique per entity and stable for its lifetime. The client never inspects
/// its contents beyond equality and display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Create a key from any string-like value.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for EntityKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// One observation of an entity's read-side state.
///
/// The raw JSON object is kept verbatim so presentation layers can render
/// whatever columns the backend serves; the identifier, status, and
/// freshness timestamp are extracted once at construction through the
/// configured [`FieldMap`](crate::FieldMap) and never re-guessed.
///
/// Records are immutable snapshots: a later observation replaces the whole
/// record, it never patches fields in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Extracted entity identifier.
    pub key: EntityKey,
    /// Extracted status value, when the backend serves one.
    pub status: Option<String>,
    /// Freshness signal parsed from the configured timestamp field.
    pub updated_at: Option<DateTime<Utc>>,
    /// All fields exactly as the read side returned them.
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// Look up a raw field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Convenience accessor for integer fields (amounts, balances).
    pub fn field_i64(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Value::as_i64)
    }

    /// Convenience accessor for string fields.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// A submitted command: where it goes, its idempotency token, and its body.
///
/// Intents are created at submission time and discarded once their outcome
/// is known; the client never persists them. Re-submitting the same token
/// with an identical payload is a no-op on the backend (idempotent replay);
/// the same token with a different payload is a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteIntent {
    /// Command path relative to the command-side base URL.
    pub path: String,
    /// Caller-supplied idempotency token.
    pub token: String,
    /// Command payload; the submitter injects the token under the
    /// configured field name before sending.
    pub payload: Map<String, Value>,
}

impl WriteIntent {
    /// Create an intent for an arbitrary command path.
    pub fn new(
        path: impl Into<String>,
        token: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            path: path.into(),
            token: token.into(),
            payload,
        }
    }

    /// Open a new account.
    pub fn open_account(account_id: &str, currency: &str, token: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("accountId".into(), Value::from(account_id));
        payload.insert("currency".into(), Value::from(currency));
        Self::new("api/accounts", token, payload)
    }

    /// Credit an account by `amount_cents`.
    pub fn credit(
        account_id: &str,
        amount_cents: i64,
        currency: &str,
        token: impl Into<String>,
    ) -> Self {
        Self::new(
            format!("api/accounts/{account_id}/credit"),
            token,
            amount_payload(amount_cents, currency),
        )
    }

    /// Debit an account by `amount_cents`.
    pub fn debit(
        account_id: &str,
        amount_cents: i64,
        currency: &str,
        token: impl Into<String>,
    ) -> Self {
        Self::new(
            format!("api/accounts/{account_id}/debit"),
            token,
            amount_payload(amount_cents, currency),
        )
    }

    /// Start a transfer between two accounts.
    pub fn transfer(
        transfer_id: &str,
        from_account: &str,
        to_account: &str,
        amount_cents: i64,
        currency: &str,
        token: impl Into<String>,
    ) -> Self {
        let mut payload = Map::new();
        payload.insert("transferId".into(), Value::from(transfer_id));
        payload.insert("fromAccount".into(), Value::from(from_account));
        payload.insert("toAccount".into(), Value::from(to_account));
        payload.insert("amountCents".into(), Value::from(amount_cents));
        payload.insert("currency".into(), Value::from(currency));
        Self::new("api/transfers", token, payload)
    }
}

fn amount_payload(amount_cents: i64, currency: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("amountCents".into(), Value::from(amount_cents));
    payload.insert("currency".into(), Value::from(currency));
    payload
}

/// The set of read-side status values that mark an entity as settled.
///
/// An empty set means every observed record counts as terminal, which is
/// how read-after-write on status-less resources (accounts) awaits first
/// visibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerminalSet(BTreeSet<String>);

impl Default for TerminalSet {
    fn default() -> Self {
        Self::new(["COMPLETED", "FAILED", "COMPENSATED"])
    }
}

impl TerminalSet {
    /// Build a terminal set from explicit status values.
    pub fn new<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(statuses.into_iter().map(Into::into).collect())
    }

    /// A set under which any observed record is terminal.
    pub fn any_observation() -> Self {
        Self(BTreeSet::new())
    }

    /// Whether `status` is a terminal value.
    pub fn contains(&self, status: &str) -> bool {
        self.0.contains(status)
    }

    /// Whether `record` has reached a stable outcome.
    pub fn is_terminal(&self, record: &EntityRecord) -> bool {
        if self.0.is_empty() {
            return true;
        }
        record
            .status
            .as_deref()
            .is_some_and(|status| self.0.contains(status))
    }
}
