//! Facade wiring the four reconciliation components together.
//!
//! One `TallyClient` tracks one read-side resource: it submits writes to
//! the command service, awaits their visibility on the query service, and
//! keeps a live subscription merging pushed rows into the shared view
//! cache. Presentation layers read the cache and the advisory stream
//! notices; they never talk to the wire themselves.

use std::sync::Arc;

use tally_core::{EntityKey, WriteIntent};

use crate::cache::ViewCache;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::poll::{ConsistencyPoller, PollOutcome};
use crate::read::{HttpReadAccessor, ListOutcome};
use crate::stream::{HttpStreamConnector, StreamReconciler, Subscription};
use crate::submit::{Outcome, WriteSubmitter};

/// Client for one resource of a split command/query backend.
pub struct TallyClient {
    cache: Arc<ViewCache>,
    submitter: WriteSubmitter,
    poller: ConsistencyPoller,
    reconciler: StreamReconciler,
}

impl TallyClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) when the command or
    /// query base URL is missing.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let cache = Arc::new(ViewCache::new(config.retention));

        let submitter = WriteSubmitter::new(config)?;

        let read = Arc::new(HttpReadAccessor::new(config, config.resource.clone())?);
        let poller = ConsistencyPoller::new(
            read,
            cache.clone(),
            config.poll,
            config.terminal.clone(),
        );

        let connector = Arc::new(HttpStreamConnector::new(config)?);
        let reconciler = StreamReconciler::new(
            connector,
            cache.clone(),
            config.backoff,
            config.fields.clone(),
        );

        Ok(Self {
            cache,
            submitter,
            poller,
            reconciler,
        })
    }

    /// Submit one command without awaiting read-side visibility.
    ///
    /// # Errors
    ///
    /// See [`WriteSubmitter::submit`].
    pub async fn submit(&self, intent: &WriteIntent) -> Result<Outcome> {
        self.submitter.submit(intent).await
    }

    /// Submit a command and, when accepted, await its read-side visibility.
    ///
    /// Conflicts and rejections return immediately with no poll: there is
    /// nothing new to become visible.
    ///
    /// # Errors
    ///
    /// See [`WriteSubmitter::submit`].
    pub async fn submit_and_await(
        &self,
        intent: &WriteIntent,
        key: &EntityKey,
    ) -> Result<(Outcome, Option<PollOutcome>)> {
        let outcome = self.submitter.submit(intent).await?;
        if !outcome.is_accepted() {
            return Ok((outcome, None));
        }
        let poll = self.poller.await_terminal(key).await;
        Ok((outcome, Some(poll)))
    }

    /// Await a terminal read state for `key`.
    pub async fn await_terminal(&self, key: &EntityKey) -> PollOutcome {
        self.poller.await_terminal(key).await
    }

    /// Pull the read side's list endpoint through the cache.
    ///
    /// # Errors
    ///
    /// See [`ConsistencyPoller::refresh_list`].
    pub async fn refresh_list(&self, limit: usize, query: Option<&str>) -> Result<ListOutcome> {
        self.poller.refresh_list(limit, query).await
    }

    /// Open the live push subscription.
    pub fn open_stream(&self) -> Subscription {
        self.reconciler.open()
    }

    /// The shared view of latest-known state per entity.
    pub fn cache(&self) -> &Arc<ViewCache> {
        &self.cache
    }
}
