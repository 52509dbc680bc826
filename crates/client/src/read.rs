//! Read-side accessors for the query service.
//!
//! The poller only needs two operations: fetch one entity by key and list
//! recent entities. Both go through the [`ReadAccessor`] trait so the
//! polling logic can be exercised against scripted fakes; the HTTP
//! implementation lives alongside it.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use tally_core::{EntityKey, EntityRecord, FieldMap};

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Result of a list query.
///
/// The read service is permitted to not expose listing yet, which is a
/// different answer than "no rows matched" — callers fall back to local
/// history in that case instead of rendering an empty table.
#[derive(Debug, Clone, PartialEq)]
pub enum ListOutcome {
    /// The rows the read side returned, in its order.
    Rows(Vec<EntityRecord>),
    /// The read side has no list endpoint.
    Unsupported,
}

impl ListOutcome {
    /// The rows, when listing is supported.
    pub fn rows(&self) -> Option<&[EntityRecord]> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Unsupported => None,
        }
    }
}

/// Access to the read side's projection.
#[async_trait]
pub trait ReadAccessor: Send + Sync {
    /// Fetch the current record for `key`.
    ///
    /// Absence is `Ok(None)`: for read-after-write, "not found" means the
    /// projection has not caught up yet, not that something failed.
    async fn fetch(&self, key: &EntityKey) -> Result<Option<EntityRecord>>;

    /// List recent records, optionally filtered by a backend text query.
    async fn list(&self, limit: usize, query: Option<&str>) -> Result<ListOutcome>;
}

/// HTTP accessor for a single read-side resource (e.g. `api/transfers`).
#[derive(Debug, Clone)]
pub struct HttpReadAccessor {
    http: reqwest::Client,
    base: Url,
    resource: String,
    fields: FieldMap,
}

impl HttpReadAccessor {
    /// Create an accessor for `resource` under the configured query base.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no query base URL is configured and
    /// [`Error::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &ClientConfig, resource: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::transport(e.to_string()))?;

        Ok(Self {
            http,
            base: config.query_base()?.clone(),
            resource: resource.into(),
            fields: config.fields.clone(),
        })
    }

    fn entity_url(&self, key: &EntityKey) -> Result<Url> {
        Ok(self.base.join(&format!("{}/{}", self.resource, key))?)
    }

    fn list_url(&self) -> Result<Url> {
        Ok(self.base.join(&self.resource)?)
    }
}

#[async_trait]
impl ReadAccessor for HttpReadAccessor {
    async fn fetch(&self, key: &EntityKey) -> Result<Option<EntityRecord>> {
        let url = self.entity_url(key)?;
        debug!(%key, "fetching read-side record");

        let response = self.http.get(url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = self
                .fields
                .message_from_value(&body)
                .unwrap_or_else(|| format!("HTTP {status}"));
            if status.is_server_error() {
                return Err(Error::transport(message));
            }
            return Err(Error::rejected(status.as_u16(), message));
        }

        let body: Value = response.json().await?;
        let record = self.fields.record_from_value(body)?;
        Ok(Some(record))
    }

    async fn list(&self, limit: usize, query: Option<&str>) -> Result<ListOutcome> {
        let url = self.list_url()?;
        let mut request = self.http.get(url).query(&[("limit", limit.to_string())]);
        if let Some(q) = query {
            request = request.query(&[("q", q)]);
        }

        let response = request.send().await?;
        let status = response.status();

        // The read side may simply not serve this endpoint yet.
        if matches!(
            status,
            reqwest::StatusCode::NOT_FOUND
                | reqwest::StatusCode::METHOD_NOT_ALLOWED
                | reqwest::StatusCode::NOT_IMPLEMENTED
        ) {
            debug!(resource = %self.resource, "list endpoint unsupported");
            return Ok(ListOutcome::Unsupported);
        }
        if !status.is_success() {
            return Err(Error::transport(format!("list failed: HTTP {status}")));
        }

        let body: Value = response.json().await?;
        let Value::Array(raw_rows) = body else {
            return Err(tally_core::Error::invalid_record("list response was not an array").into());
        };

        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in raw_rows {
            match self.fields.record_from_value(raw) {
                Ok(record) => rows.push(record),
                Err(e) => warn!(%e, "skipping malformed list row"),
            }
        }
        Ok(ListOutcome::Rows(rows))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn accessor(server: &MockServer) -> HttpReadAccessor {
        let config = ClientConfig::with_bases(
            server.uri().parse().unwrap(),
            server.uri().parse().unwrap(),
        );
        HttpReadAccessor::new(&config, "api/transfers").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/transfers/tx_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "transfer_id": "tx_1",
                "status": "COMPLETED",
                "amount_cents": 1200,
                "updated_at": "2024-03-01T10:15:30Z"
            })))
            .mount(&server)
            .await;

        let record = accessor(&server)
            .await
            .fetch(&EntityKey::new("tx_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status.as_deref(), Some("COMPLETED"));
        assert_eq!(record.field_i64("amount_cents"), Some(1200));
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/transfers/tx_missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = accessor(&server)
            .await
            .fetch(&EntityKey::new("tx_missing"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/transfers/tx_1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = accessor(&server)
            .await
            .fetch(&EntityKey::new("tx_1"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_list_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/transfers"))
            .and(query_param("limit", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"transfer_id": "tx_1", "status": "COMPLETED"},
                {"transfer_id": "tx_2", "status": "PENDING"}
            ])))
            .mount(&server)
            .await;

        let outcome = accessor(&server).await.list(50, None).await.unwrap();
        let rows = outcome.rows().unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_list_unsupported_distinct_from_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/transfers"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = accessor(&server).await.list(50, None).await.unwrap();
        assert_eq!(outcome, ListOutcome::Unsupported);
        assert!(outcome.rows().is_none());
    }

    #[tokio::test]
    async fn test_list_skips_malformed_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/transfers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"transfer_id": "tx_1", "status": "COMPLETED"},
                {"status": "no key here"}
            ])))
            .mount(&server)
            .await;

        let outcome = accessor(&server).await.list(50, None).await.unwrap();
        assert_eq!(outcome.rows().unwrap().len(), 1);
    }
}
