//! Shared in-memory projection of latest-known state per entity.
//!
//! Both the consistency poller and the stream reconciler write through this
//! cache, so a record observed first on the stream and then superseded by
//! an older poll response is not overwritten: the freshness check runs
//! before replacement. Readers always see whole records; mutations happen
//! under the write lock before anything is published.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use tally_core::{EntityKey, EntityRecord};

#[derive(Debug, Clone)]
struct Entry {
    record: EntityRecord,
    /// Receipt sequence stamped on every accepted upsert; drives
    /// most-recently-updated ordering and eviction.
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<EntityKey, Entry>,
    next_seq: u64,
}

/// Bounded latest-wins view of entity state.
#[derive(Debug)]
pub struct ViewCache {
    inner: RwLock<Inner>,
    retention: usize,
}

impl ViewCache {
    /// Create a cache retaining at most `retention` records.
    pub fn new(retention: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            retention: retention.max(1),
        }
    }

    /// Apply an observation, keeping the freshest record per key.
    ///
    /// When both the held and incoming record carry a freshness timestamp,
    /// a strictly older incoming record is discarded and an equal-or-newer
    /// one replaces. When either side lacks the timestamp, receipt order
    /// wins. Returns whether the record was applied.
    pub async fn upsert(&self, record: EntityRecord) -> bool {
        let mut inner = self.inner.write().await;

        if let Some(held) = inner.entries.get(&record.key) {
            if let (Some(held_at), Some(incoming_at)) = (held.record.updated_at, record.updated_at)
            {
                if incoming_at < held_at {
                    debug!(key = %record.key, "discarding stale observation");
                    return false;
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq = inner.next_seq.saturating_add(1);
        inner.entries.insert(record.key.clone(), Entry { record, seq });

        if inner.entries.len() > self.retention {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                inner.entries.remove(&key);
                debug!(key = %key, "evicted oldest record");
            }
        }

        true
    }

    /// Latest known record for `key`.
    pub async fn get(&self, key: &EntityKey) -> Option<EntityRecord> {
        let inner = self.inner.read().await;
        inner.entries.get(key).map(|entry| entry.record.clone())
    }

    /// Records ordered most-recently-updated first, at most `limit`.
    pub async fn list(&self, limit: usize) -> Vec<EntityRecord> {
        self.collect(limit, |_| true).await
    }

    /// Like [`list`](Self::list), with a predicate applied after ordering.
    pub async fn list_filtered<F>(&self, limit: usize, filter: F) -> Vec<EntityRecord>
    where
        F: Fn(&EntityRecord) -> bool,
    {
        self.collect(limit, filter).await
    }

    /// Number of retained records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether the cache holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn collect<F>(&self, limit: usize, filter: F) -> Vec<EntityRecord>
    where
        F: Fn(&EntityRecord) -> bool,
    {
        let inner = self.inner.read().await;
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries
            .into_iter()
            .filter(|entry| filter(&entry.record))
            .take(limit)
            .map(|entry| entry.record.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::Map;

    fn record(key: &str, status: &str, updated_secs: Option<i64>) -> EntityRecord {
        EntityRecord {
            key: EntityKey::new(key),
            status: Some(status.to_owned()),
            updated_at: updated_secs.map(|s| Utc.timestamp_opt(s, 0).single().unwrap()),
            fields: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_newer_freshness_wins_regardless_of_order() {
        let cache = ViewCache::new(10);
        let older = record("tx_1", "PENDING", Some(100));
        let newer = record("tx_1", "COMPLETED", Some(200));

        // Newer first, older second: older is discarded.
        assert!(cache.upsert(newer.clone()).await);
        assert!(!cache.upsert(older.clone()).await);
        assert_eq!(
            cache.get(&EntityKey::new("tx_1")).await.unwrap().status,
            Some("COMPLETED".into())
        );

        // Older first, newer second: newer replaces.
        let cache = ViewCache::new(10);
        assert!(cache.upsert(older).await);
        assert!(cache.upsert(newer).await);
        assert_eq!(
            cache.get(&EntityKey::new("tx_1")).await.unwrap().status,
            Some("COMPLETED".into())
        );
    }

    #[tokio::test]
    async fn test_equal_freshness_replaces() {
        let cache = ViewCache::new(10);
        let first = record("tx_1", "PROCESSING", Some(100));
        let second = record("tx_1", "COMPLETED", Some(100));
        assert!(cache.upsert(first).await);
        assert!(cache.upsert(second).await);
        assert_eq!(
            cache.get(&EntityKey::new("tx_1")).await.unwrap().status,
            Some("COMPLETED".into())
        );
    }

    #[tokio::test]
    async fn test_missing_timestamp_falls_back_to_receipt_order() {
        let cache = ViewCache::new(10);
        assert!(cache.upsert(record("acc_1", "A", None)).await);
        assert!(cache.upsert(record("acc_1", "B", None)).await);
        assert_eq!(
            cache.get(&EntityKey::new("acc_1")).await.unwrap().status,
            Some("B".into())
        );
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest_updated_first() {
        let cache = ViewCache::new(3);
        for i in 0..5 {
            cache.upsert(record(&format!("tx_{i}"), "PENDING", None)).await;
        }

        assert_eq!(cache.len().await, 3);
        assert!(cache.get(&EntityKey::new("tx_0")).await.is_none());
        assert!(cache.get(&EntityKey::new("tx_1")).await.is_none());
        assert!(cache.get(&EntityKey::new("tx_4")).await.is_some());
    }

    #[tokio::test]
    async fn test_list_orders_most_recent_first() {
        let cache = ViewCache::new(10);
        cache.upsert(record("tx_a", "PENDING", None)).await;
        cache.upsert(record("tx_b", "PENDING", None)).await;
        cache.upsert(record("tx_a", "COMPLETED", None)).await;

        let listed = cache.list(10).await;
        let keys: Vec<_> = listed.iter().map(|r| r.key.as_str().to_owned()).collect();
        assert_eq!(keys, vec!["tx_a", "tx_b"]);
    }

    #[tokio::test]
    async fn test_list_respects_limit() {
        let cache = ViewCache::new(10);
        for i in 0..6 {
            cache.upsert(record(&format!("tx_{i}"), "PENDING", None)).await;
        }
        assert_eq!(cache.list(4).await.len(), 4);
    }

    #[tokio::test]
    async fn test_list_filtered_applies_after_ordering() {
        let cache = ViewCache::new(10);
        cache.upsert(record("tx_a", "COMPLETED", None)).await;
        cache.upsert(record("tx_b", "FAILED", None)).await;
        cache.upsert(record("tx_c", "COMPLETED", None)).await;

        let completed = cache
            .list_filtered(10, |r| r.status.as_deref() == Some("COMPLETED"))
            .await;
        let keys: Vec<_> = completed.iter().map(|r| r.key.as_str().to_owned()).collect();
        assert_eq!(keys, vec!["tx_c", "tx_a"]);
        // Filtering must not disturb retention.
        assert_eq!(cache.len().await, 3);
    }
}
