#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # tally-client
//!
//! Reconciliation client for a split command/query ledger backend: writes
//! are accepted by a command service, reads come from a separately-updated
//! (and therefore lagging) projection, and a best-effort event stream
//! pushes incremental state.
//!
//! ## Features
//!
//! - Idempotent command submission with conflict/reuse classification
//! - Bounded-time polling until a write becomes visible on the read side
//! - A supervised push subscription that reconnects with jittered backoff
//! - One deduplicated, freshness-ordered view cache fed by both channels
//!
//! ## Example
//!
//! ```ignore
//! use tally_client::{ClientConfig, TallyClient};
//! use tally_core::{EntityKey, WriteIntent};
//!
//! let config = ClientConfig::with_bases(command_url, query_url);
//! let client = TallyClient::new(&config)?;
//!
//! // Keep the live feed merging into the cache.
//! let mut subscription = client.open_stream();
//!
//! // Submit a transfer and wait until the read side reflects it.
//! let intent = WriteIntent::transfer("tx_1", "acc_a", "acc_b", 1200, "USD", "tx_1-k");
//! let (outcome, poll) = client
//!     .submit_and_await(&intent, &EntityKey::new("tx_1"))
//!     .await?;
//!
//! // Render whatever the cache knows.
//! let rows = client.cache().list(50).await;
//! ```

pub mod backoff;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod poll;
pub mod read;
pub mod sse;
pub mod stream;
pub mod submit;

// Re-export commonly used items
pub use backoff::BackoffState;
pub use cache::ViewCache;
pub use client::TallyClient;
pub use config::{BackoffPolicy, ClientConfig, PollPolicy};
pub use error::{Error, Result};
pub use poll::{ConsistencyPoller, PollOutcome};
pub use read::{HttpReadAccessor, ListOutcome, ReadAccessor};
pub use sse::{SseEvent, SseParser};
pub use stream::{
    HttpStreamConnector, StreamConnector, StreamNotice, StreamReconciler, Subscription,
};
pub use submit::{Outcome, WriteSubmitter};
