//! Configuration for the tally client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use tally_core::{FieldMap, TerminalSet};

use crate::error::{Error, Result};

/// Configuration for the reconciliation client.
///
/// The command and query sides are separate services with separate base
/// URLs; the stream is served by the query side under `stream_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the command (write) service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_base: Option<Url>,

    /// Base URL of the query (read) service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_base: Option<Url>,

    /// Read-side resource the client tracks, relative to `query_base`.
    #[serde(default = "default_resource")]
    pub resource: String,

    /// Path of the event-stream endpoint, relative to `query_base`.
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Per-request timeout.
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,

    /// Maximum records retained in the view cache.
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Status values that settle an entity.
    #[serde(default)]
    pub terminal: TerminalSet,

    /// Backend field names.
    #[serde(default)]
    pub fields: FieldMap,

    /// Polling schedule for read-after-write waits.
    #[serde(default)]
    pub poll: PollPolicy,

    /// Reconnect schedule for the streaming channel.
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_base: None,
            query_base: None,
            resource: default_resource(),
            stream_path: default_stream_path(),
            timeout: default_timeout(),
            retention: default_retention(),
            terminal: TerminalSet::default(),
            fields: FieldMap::default(),
            poll: PollPolicy::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Create a config pointing at explicit command and query services.
    pub fn with_bases(command_base: Url, query_base: Url) -> Self {
        Self {
            command_base: Some(command_base),
            query_base: Some(query_base),
            ..Default::default()
        }
    }

    /// The command-side base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no command URL is configured.
    pub fn command_base(&self) -> Result<&Url> {
        self.command_base
            .as_ref()
            .ok_or_else(|| Error::config("no command base URL configured"))
    }

    /// The query-side base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no query URL is configured.
    pub fn query_base(&self) -> Result<&Url> {
        self.query_base
            .as_ref()
            .ok_or_else(|| Error::config("no query base URL configured"))
    }

    /// Set the tracked read-side resource.
    #[must_use]
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Set the stream endpoint path.
    #[must_use]
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the backend field names.
    #[must_use]
    pub fn fields(mut self, fields: FieldMap) -> Self {
        self.fields = fields;
        self
    }

    /// Set the terminal status set.
    #[must_use]
    pub fn terminal(mut self, terminal: TerminalSet) -> Self {
        self.terminal = terminal;
        self
    }

    /// Set the view cache retention bound.
    #[must_use]
    pub const fn retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Set the polling schedule.
    #[must_use]
    pub const fn poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Set the reconnect schedule.
    #[must_use]
    pub const fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Recognized: `TALLY_COMMAND_URL`, `TALLY_QUERY_URL`,
    /// `TALLY_STREAM_PATH`, `TALLY_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("TALLY_COMMAND_URL") {
            if let Ok(parsed) = url.parse() {
                config.command_base = Some(parsed);
            }
        }

        if let Ok(url) = std::env::var("TALLY_QUERY_URL") {
            if let Ok(parsed) = url.parse() {
                config.query_base = Some(parsed);
            }
        }

        if let Ok(path) = std::env::var("TALLY_STREAM_PATH") {
            config.stream_path = path;
        }

        if let Ok(secs) = std::env::var("TALLY_TIMEOUT_SECS") {
            if let Ok(parsed) = secs.parse() {
                config.timeout = Duration::from_secs(parsed);
            }
        }

        config
    }

    /// Load configuration from a file (JSON or TOML by extension).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read config: {e}")))?;

        if path.extension().is_some_and(|e| e == "json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            toml::from_str(&content).map_err(|e| Error::config(format!("failed to parse config: {e}")))
        }
    }
}

/// Schedule for awaiting a terminal read state after a write.
///
/// Waits grow geometrically from `initial_wait` up to `ceiling`; the
/// overall attempt stops at `deadline`. The read projection may never
/// catch up, so the deadline is mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// First inter-attempt wait.
    #[serde(with = "duration_millis", default = "default_poll_initial")]
    pub initial_wait: Duration,

    /// Multiplicative growth applied after each attempt.
    #[serde(default = "default_poll_growth")]
    pub growth: f64,

    /// Upper bound on a single inter-attempt wait.
    #[serde(with = "duration_millis", default = "default_poll_ceiling")]
    pub ceiling: Duration,

    /// Overall time allowed before giving up with "still processing".
    #[serde(with = "duration_millis", default = "default_poll_deadline")]
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_wait: default_poll_initial(),
            growth: default_poll_growth(),
            ceiling: default_poll_ceiling(),
            deadline: default_poll_deadline(),
        }
    }
}

impl PollPolicy {
    /// The wait that follows `current`, grown and capped.
    pub fn grow(&self, current: Duration) -> Duration {
        let grown = (millis(current) as f64 * self.growth).floor() as u64;
        Duration::from_millis(grown.min(millis(self.ceiling)))
    }
}

/// Schedule for reconnecting the streaming channel.
///
/// The delay grows geometrically from `floor` to `cap` across consecutive
/// failures, resets to `floor` on a successful connect, and each wait adds
/// random jitter of up to `jitter` times the current delay so that many
/// clients do not reconnect in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Starting (and post-success) delay.
    #[serde(with = "duration_millis", default = "default_backoff_floor")]
    pub floor: Duration,

    /// Maximum delay.
    #[serde(with = "duration_millis", default = "default_backoff_cap")]
    pub cap: Duration,

    /// Multiplicative growth applied after each failed attempt.
    #[serde(default = "default_backoff_growth")]
    pub growth: f64,

    /// Jitter fraction of the current delay (0.0 - 1.0).
    #[serde(default = "default_backoff_jitter")]
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor: default_backoff_floor(),
            cap: default_backoff_cap(),
            growth: default_backoff_growth(),
            jitter: default_backoff_jitter(),
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_resource() -> String {
    "api/transfers".into()
}

fn default_stream_path() -> String {
    "api/stream/transfers".into()
}

const fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_retention() -> usize {
    200
}

const fn default_poll_initial() -> Duration {
    Duration::from_millis(250)
}

const fn default_poll_growth() -> f64 {
    1.7
}

const fn default_poll_ceiling() -> Duration {
    Duration::from_millis(1200)
}

const fn default_poll_deadline() -> Duration {
    Duration::from_millis(8000)
}

const fn default_backoff_floor() -> Duration {
    Duration::from_millis(500)
}

const fn default_backoff_cap() -> Duration {
    Duration::from_secs(15)
}

const fn default_backoff_growth() -> f64 {
    1.7
}

const fn default_backoff_jitter() -> f64 {
    0.3
}

/// Serialization helper for Duration as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serialization helper for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        super::millis(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
