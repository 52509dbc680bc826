//! Long-lived push subscription with supervised reconnection.
//!
//! A single push connection is inherently lossy under proxy and network
//! interruption, so the worker runs a small state machine: Connecting,
//! Open (records flow into the view cache), Backoff (jittered, growing,
//! capped delay), and Closed, reachable only through [`Subscription::close`].
//! Redelivery and out-of-order delivery are safe because every record goes
//! through the cache's freshness rule; the caller only ever hears advisory
//! notices.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use tally_core::{EntityKey, FieldMap};

use crate::backoff::BackoffState;
use crate::cache::ViewCache;
use crate::config::{BackoffPolicy, ClientConfig, millis};
use crate::error::{Error, Result};
use crate::sse::{SseEvent, SseParser};

/// Inbound events from one connection attempt.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>;

/// Opens one streaming connection.
///
/// The reconnect state machine is the contract; the transport behind it is
/// swappable, which is also how the tests drive the machine with scripted
/// connections.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Establish a connection and return its event stream.
    async fn connect(&self) -> Result<EventStream>;
}

/// Connects to the query side's `text/event-stream` endpoint.
#[derive(Debug, Clone)]
pub struct HttpStreamConnector {
    http: reqwest::Client,
    url: Url,
}

impl HttpStreamConnector {
    /// Create a connector for the configured stream endpoint.
    ///
    /// The HTTP client carries no request timeout: the connection is
    /// supposed to live until the server or network drops it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no query base URL is configured.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let url = config.query_base()?.join(&config.stream_path)?;
        Ok(Self {
            http: reqwest::Client::new(),
            url,
        })
    }
}

#[async_trait]
impl StreamConnector for HttpStreamConnector {
    async fn connect(&self) -> Result<EventStream> {
        let response = self
            .http
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        let body = Box::pin(response.bytes_stream());
        let stream = futures::stream::unfold(
            (body, SseParser::new(), VecDeque::new()),
            |(mut body, mut parser, mut pending)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((Ok(event), (body, parser, pending)));
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => pending.extend(parser.feed(&chunk)),
                        Some(Err(e)) => return Some((Err(Error::from(e)), (body, parser, pending))),
                        None => return None,
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }
}

/// Advisory notifications from the stream worker.
///
/// Reconnection is otherwise silent; none of these require action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamNotice {
    /// A connection was established; the backoff delay was reset.
    Connected,
    /// A record for `key` was applied to the view cache.
    Record(EntityKey),
    /// The server signalled liveness.
    Heartbeat,
    /// The connection dropped or failed; a reconnect is scheduled.
    Disconnected {
        /// Transport-level reason.
        reason: String,
    },
}

/// Maintains the push subscription and merges records into the view cache.
pub struct StreamReconciler {
    connector: Arc<dyn StreamConnector>,
    cache: Arc<ViewCache>,
    policy: BackoffPolicy,
    fields: FieldMap,
}

impl StreamReconciler {
    /// Create a reconciler over an explicit connector.
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        cache: Arc<ViewCache>,
        policy: BackoffPolicy,
        fields: FieldMap,
    ) -> Self {
        Self {
            connector,
            cache,
            policy,
            fields,
        }
    }

    /// Spawn the connection worker and return its handle.
    pub fn open(&self) -> Subscription {
        let (notice_tx, notice_rx) = mpsc::channel(64);
        let (close_tx, close_rx) = watch::channel(false);

        let handle = tokio::spawn(run_loop(
            self.connector.clone(),
            self.cache.clone(),
            self.policy,
            self.fields.clone(),
            notice_tx,
            close_rx,
        ));

        Subscription {
            close: close_tx,
            notices: notice_rx,
            handle: Some(handle),
        }
    }
}

/// Handle to an open stream subscription.
///
/// Dropping the subscription closes it.
pub struct Subscription {
    close: watch::Sender<bool>,
    notices: mpsc::Receiver<StreamNotice>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Await the next advisory notice.
    ///
    /// Returns `None` once the worker has stopped and drained.
    pub async fn next_notice(&mut self) -> Option<StreamNotice> {
        self.notices.recv().await
    }

    /// Non-blocking notice poll.
    pub fn try_notice(&mut self) -> Option<StreamNotice> {
        self.notices.try_recv().ok()
    }

    /// Permanently stop reconnecting.
    ///
    /// Idempotent; cancels any pending backoff timer, so no connection
    /// attempt happens after this returns.
    pub fn close(&self) {
        let _ = self.close.send(true);
    }

    /// Wait for the worker to exit (after [`close`](Self::close)).
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.close.send(true);
    }
}

async fn run_loop(
    connector: Arc<dyn StreamConnector>,
    cache: Arc<ViewCache>,
    policy: BackoffPolicy,
    fields: FieldMap,
    notices: mpsc::Sender<StreamNotice>,
    mut close: watch::Receiver<bool>,
) {
    let mut backoff = BackoffState::new(policy);

    loop {
        if *close.borrow() {
            break;
        }

        // Connecting
        let connected = tokio::select! {
            changed = close.changed() => {
                let _ = changed;
                break;
            }
            result = connector.connect() => result,
        };

        match connected {
            Ok(mut events) => {
                // Open: delay back to the floor.
                backoff.reset();
                info!("stream connected");
                notify(&notices, StreamNotice::Connected);
                if !read_events(&mut events, &cache, &fields, &notices, &mut close).await {
                    break;
                }
            }
            Err(e) => {
                debug!(%e, "stream connect failed");
                notify(
                    &notices,
                    StreamNotice::Disconnected {
                        reason: e.to_string(),
                    },
                );
            }
        }

        // Backoff
        let wait = backoff.next_wait();
        debug!(wait_ms = millis(wait), "waiting before reconnect");
        tokio::select! {
            changed = close.changed() => {
                let _ = changed;
                break;
            }
            () = tokio::time::sleep(wait) => {}
        }
    }

    debug!("stream worker stopped");
}

/// Drain one open connection. Returns `false` when the subscription was
/// closed, `true` when the connection dropped and a reconnect is due.
async fn read_events(
    events: &mut EventStream,
    cache: &ViewCache,
    fields: &FieldMap,
    notices: &mpsc::Sender<StreamNotice>,
    close: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        tokio::select! {
            changed = close.changed() => {
                let _ = changed;
                return false;
            }
            item = events.next() => match item {
                Some(Ok(event)) => apply_event(event, cache, fields, notices).await,
                Some(Err(e)) => {
                    warn!(%e, "stream read failed");
                    notify(notices, StreamNotice::Disconnected { reason: e.to_string() });
                    return true;
                }
                None => {
                    debug!("stream ended");
                    notify(notices, StreamNotice::Disconnected {
                        reason: "stream closed by server".into(),
                    });
                    return true;
                }
            }
        }
    }
}

async fn apply_event(
    event: SseEvent,
    cache: &ViewCache,
    fields: &FieldMap,
    notices: &mpsc::Sender<StreamNotice>,
) {
    match event.name.as_str() {
        "row" => {
            let parsed = serde_json::from_str::<Value>(&event.data)
                .map_err(Error::from)
                .and_then(|value| fields.record_from_value(value).map_err(Error::from));
            match parsed {
                Ok(record) => {
                    let key = record.key.clone();
                    if cache.upsert(record).await {
                        notify(notices, StreamNotice::Record(key));
                    }
                }
                Err(e) => warn!(%e, "skipping malformed row event"),
            }
        }
        "heartbeat" => notify(notices, StreamNotice::Heartbeat),
        other => debug!(event = other, "ignoring unknown stream event"),
    }
}

/// Notices are advisory: a slow or absent listener must not stall the
/// stream, so sends never block and overflow is dropped.
fn notify(notices: &mpsc::Sender<StreamNotice>, notice: StreamNotice) {
    let _ = notices.try_send(notice);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    enum Script {
        /// Connection attempt fails.
        Fail,
        /// Connection succeeds, serves the events, then ends.
        Serve(Vec<SseEvent>),
        /// Connection succeeds, serves the events, then stays open.
        ServeThenHold(Vec<SseEvent>),
    }

    struct ScriptedConnector {
        scripts: Mutex<VecDeque<Script>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StreamConnector for ScriptedConnector {
        async fn connect(&self) -> Result<EventStream> {
            self.attempts.lock().unwrap().push(Instant::now());
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                None | Some(Script::Fail) => Err(Error::transport("scripted connect failure")),
                Some(Script::Serve(events)) => {
                    Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
                }
                Some(Script::ServeThenHold(events)) => Ok(Box::pin(
                    futures::stream::iter(events.into_iter().map(Ok))
                        .chain(futures::stream::pending()),
                )),
            }
        }
    }

    fn row(json: &str) -> SseEvent {
        SseEvent {
            name: "row".into(),
            data: json.into(),
        }
    }

    fn heartbeat() -> SseEvent {
        SseEvent {
            name: "heartbeat".into(),
            data: String::new(),
        }
    }

    fn reconciler(connector: Arc<ScriptedConnector>) -> (StreamReconciler, Arc<ViewCache>) {
        let cache = Arc::new(ViewCache::new(50));
        let reconciler = StreamReconciler::new(
            connector,
            cache.clone(),
            BackoffPolicy::default(),
            FieldMap::default(),
        );
        (reconciler, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rows_flow_into_cache_with_notices() {
        let connector = ScriptedConnector::new(vec![Script::ServeThenHold(vec![
            row(r#"{"transfer_id":"tx_1","status":"PENDING"}"#),
            heartbeat(),
            row(r#"{"transfer_id":"tx_1","status":"COMPLETED"}"#),
        ])]);
        let (reconciler, cache) = reconciler(connector);

        let mut sub = reconciler.open();
        assert_eq!(sub.next_notice().await, Some(StreamNotice::Connected));
        assert_eq!(
            sub.next_notice().await,
            Some(StreamNotice::Record(EntityKey::new("tx_1")))
        );
        assert_eq!(sub.next_notice().await, Some(StreamNotice::Heartbeat));
        assert_eq!(
            sub.next_notice().await,
            Some(StreamNotice::Record(EntityKey::new("tx_1")))
        );

        assert_eq!(
            cache.get(&EntityKey::new("tx_1")).await.unwrap().status,
            Some("COMPLETED".into())
        );

        sub.close();
        sub.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_with_growing_jittered_delay() {
        let connector = ScriptedConnector::new(vec![
            Script::Fail,
            Script::Fail,
            Script::ServeThenHold(vec![]),
        ]);
        let (reconciler, _cache) = reconciler(connector.clone());

        let mut sub = reconciler.open();
        assert!(matches!(
            sub.next_notice().await,
            Some(StreamNotice::Disconnected { .. })
        ));
        assert!(matches!(
            sub.next_notice().await,
            Some(StreamNotice::Disconnected { .. })
        ));
        assert_eq!(sub.next_notice().await, Some(StreamNotice::Connected));

        let attempts = connector.attempt_times();
        assert_eq!(attempts.len(), 3);

        // First gap: floor 500ms plus up to 30% jitter.
        let gap1 = attempts.get(1).unwrap().duration_since(*attempts.first().unwrap());
        assert!(gap1 >= Duration::from_millis(500), "gap1 {gap1:?}");
        assert!(gap1 <= Duration::from_millis(650), "gap1 {gap1:?}");

        // Second gap: 850ms plus up to 30% jitter.
        let gap2 = attempts.get(2).unwrap().duration_since(*attempts.get(1).unwrap());
        assert!(gap2 >= Duration::from_millis(850), "gap2 {gap2:?}");
        assert!(gap2 <= Duration::from_millis(1105), "gap2 {gap2:?}");

        sub.close();
        sub.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_successful_open() {
        let connector = ScriptedConnector::new(vec![
            Script::Fail,
            Script::Fail,
            // Success (stream ends immediately), so the next delay is back
            // at the floor instead of continuing to grow.
            Script::Serve(vec![]),
            Script::ServeThenHold(vec![]),
        ]);
        let (reconciler, _cache) = reconciler(connector.clone());

        let mut sub = reconciler.open();
        loop {
            if sub.next_notice().await == Some(StreamNotice::Connected)
                && connector.attempt_times().len() == 4
            {
                break;
            }
        }

        let attempts = connector.attempt_times();
        let gap = attempts.get(3).unwrap().duration_since(*attempts.get(2).unwrap());
        assert!(gap >= Duration::from_millis(500), "gap {gap:?}");
        assert!(gap <= Duration::from_millis(650), "gap {gap:?}");

        sub.close();
        sub.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let connector = ScriptedConnector::new(vec![]);
        let (reconciler, _cache) = reconciler(connector.clone());

        let mut sub = reconciler.open();
        assert!(matches!(
            sub.next_notice().await,
            Some(StreamNotice::Disconnected { .. })
        ));

        // The worker is now in its backoff sleep; close must cancel it.
        sub.close();
        sub.close(); // idempotent
        sub.join().await;

        assert_eq!(connector.attempt_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_rows_are_skipped_not_fatal() {
        let connector = ScriptedConnector::new(vec![Script::ServeThenHold(vec![
            row("this is not json"),
            row(r#"{"status":"PENDING"}"#),
            row(r#"{"transfer_id":"tx_2","status":"COMPLETED"}"#),
        ])]);
        let (reconciler, cache) = reconciler(connector);

        let mut sub = reconciler.open();
        assert_eq!(sub.next_notice().await, Some(StreamNotice::Connected));
        assert_eq!(
            sub.next_notice().await,
            Some(StreamNotice::Record(EntityKey::new("tx_2")))
        );

        assert_eq!(cache.len().await, 1);

        sub.close();
        sub.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_stream_record_does_not_clobber_cache() {
        let connector = ScriptedConnector::new(vec![Script::ServeThenHold(vec![row(
            r#"{"transfer_id":"tx_1","status":"PENDING","updated_at":"2024-03-01T10:00:00Z"}"#,
        )])]);
        let cache = Arc::new(ViewCache::new(50));
        let reconciler = StreamReconciler::new(
            connector,
            cache.clone(),
            BackoffPolicy::default(),
            FieldMap::default(),
        );

        // The poller already saw a fresher record.
        let fresher = FieldMap::default()
            .record_from_value(serde_json::json!({
                "transfer_id": "tx_1",
                "status": "COMPLETED",
                "updated_at": "2024-03-01T10:00:05Z"
            }))
            .unwrap();
        cache.upsert(fresher).await;

        let mut sub = reconciler.open();
        assert_eq!(sub.next_notice().await, Some(StreamNotice::Connected));

        // Give the worker a tick to process the stale row.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            cache.get(&EntityKey::new("tx_1")).await.unwrap().status,
            Some("COMPLETED".into())
        );

        sub.close();
        sub.join().await;
    }
}
