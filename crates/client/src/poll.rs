//! Bounded-time polling for a terminal read state.
//!
//! The read projection lags the write side by an unbounded but usually
//! small interval. Hammering it with immediate retries amplifies load
//! exactly when it is behind, so waits grow geometrically to a ceiling;
//! and because the projection may never catch up at all, a hard deadline
//! turns "hung" into a presentable "still processing".

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use tally_core::{EntityKey, EntityRecord, TerminalSet};

use crate::cache::ViewCache;
use crate::config::PollPolicy;
use crate::error::Result;
use crate::read::{ListOutcome, ReadAccessor};

/// Result of awaiting a terminal read state.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The entity reached a terminal status before the deadline.
    Reached(EntityRecord),
    /// The deadline expired; the last observed record, if any, is carried
    /// so callers can present partial progress.
    TimedOut(Option<EntityRecord>),
}

impl PollOutcome {
    /// The record observed last, terminal or not.
    pub const fn record(&self) -> Option<&EntityRecord> {
        match self {
            Self::Reached(record) => Some(record),
            Self::TimedOut(record) => record.as_ref(),
        }
    }

    /// Whether a terminal state was reached.
    pub const fn is_reached(&self) -> bool {
        matches!(self, Self::Reached(_))
    }
}

/// Polls the read side until an entity settles or a deadline expires.
pub struct ConsistencyPoller {
    read: Arc<dyn ReadAccessor>,
    cache: Arc<ViewCache>,
    policy: PollPolicy,
    terminal: TerminalSet,
}

impl ConsistencyPoller {
    /// Create a poller writing observations through `cache`.
    pub fn new(
        read: Arc<dyn ReadAccessor>,
        cache: Arc<ViewCache>,
        policy: PollPolicy,
        terminal: TerminalSet,
    ) -> Self {
        Self {
            read,
            cache,
            policy,
            terminal,
        }
    }

    /// Await a terminal state for `key` using the policy deadline.
    ///
    /// Cancellation is by dropping the returned future; observations
    /// already applied to the cache survive cancellation.
    pub async fn await_terminal(&self, key: &EntityKey) -> PollOutcome {
        self.await_terminal_within(key, self.policy.deadline).await
    }

    /// Await a terminal state for `key` with an explicit deadline.
    ///
    /// Every fetched record, terminal or not, is upserted into the view
    /// cache. "Not found" and transport errors count as non-terminal
    /// observations toward the deadline; a transient read-side blip must
    /// not abort the wait.
    pub async fn await_terminal_within(&self, key: &EntityKey, deadline: Duration) -> PollOutcome {
        let started = Instant::now();
        let mut wait = self.policy.initial_wait;
        let mut last: Option<EntityRecord> = None;

        loop {
            match self.read.fetch(key).await {
                Ok(Some(record)) => {
                    self.cache.upsert(record.clone()).await;
                    if self.terminal.is_terminal(&record) {
                        debug!(%key, status = ?record.status, "terminal state reached");
                        return PollOutcome::Reached(record);
                    }
                    last = Some(record);
                }
                Ok(None) => {
                    debug!(%key, "not visible on the read side yet");
                }
                Err(e) => {
                    debug!(%key, %e, "read-side blip while polling");
                }
            }

            if started.elapsed() >= deadline {
                debug!(%key, "deadline expired while awaiting terminal state");
                return PollOutcome::TimedOut(last);
            }

            tokio::time::sleep(wait).await;
            wait = self.policy.grow(wait);
        }
    }

    /// Pull the read side's list endpoint through the cache.
    ///
    /// Every returned row is upserted (the freshness rule keeps newer
    /// streamed state intact). `Unsupported` passes through so callers can
    /// fall back to local history.
    ///
    /// # Errors
    ///
    /// Propagates read accessor failures.
    pub async fn refresh_list(&self, limit: usize, query: Option<&str>) -> Result<ListOutcome> {
        let outcome = self.read.list(limit, query).await?;
        if let ListOutcome::Rows(rows) = &outcome {
            for record in rows {
                self.cache.upsert(record.clone()).await;
            }
        }
        Ok(outcome)
    }
}
