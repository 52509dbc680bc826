//! Bounded in-memory log of submitted commands.
//!
//! Presentation layers append an entry per user action and render the most
//! recent ones; the log caps its size and drops the oldest entries. None of
//! the reconciliation components read it.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DEFAULT_CAPACITY: usize = 200;

/// One logged command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Kind of command ("transfer", "credit", ...). Free-form.
    pub kind: String,
    /// Presentation-defined detail fields.
    pub detail: Map<String, Value>,
    /// When the entry was logged.
    pub at: DateTime<Utc>,
}

impl ActivityEntry {
    /// Create an entry stamped with the current time.
    pub fn now(kind: impl Into<String>, detail: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            detail,
            at: Utc::now(),
        }
    }
}

/// Append-only activity log with bounded retention.
#[derive(Debug)]
pub struct ActivityLog {
    entries: RwLock<VecDeque<ActivityEntry>>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ActivityLog {
    /// Create a log retaining at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, dropping the oldest once over capacity.
    pub fn push(&self, entry: ActivityEntry) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    /// The most recent entries, newest first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.iter().take(limit).cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use serde_json::json;

    fn entry(kind: &str, id: &str) -> ActivityEntry {
        let mut detail = Map::new();
        detail.insert("id".into(), json!(id));
        ActivityEntry::now(kind, detail)
    }

    #[test]
    fn test_push_and_recent_newest_first() {
        let log = ActivityLog::default();
        log.push(entry("credit", "a"));
        log.push(entry("transfer", "b"));

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent.first().map(|e| e.kind.as_str()), Some("transfer"));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = ActivityLog::new(3);
        for i in 0..5 {
            log.push(entry("credit", &format!("k{i}")));
        }

        assert_eq!(log.len(), 3);
        let recent = log.recent(3);
        let ids: Vec<_> = recent
            .iter()
            .filter_map(|e| e.detail.get("id").and_then(Value::as_str))
            .collect();
        assert_eq!(ids, vec!["k4", "k3", "k2"]);
    }

    #[test]
    fn test_recent_respects_limit() {
        let log = ActivityLog::default();
        for i in 0..10 {
            log.push(entry("debit", &format!("k{i}")));
        }
        assert_eq!(log.recent(4).len(), 4);
    }

    #[test]
    fn test_clear() {
        let log = ActivityLog::default();
        log.push(entry("credit", "a"));
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
    }
}
