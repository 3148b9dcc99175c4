// In-memory idempotency, dedup, and acknowledgment stores backed by
// `BoundedHashMap` for LRU eviction at the configured capacity. TTL is
// enforced lazily on read plus a periodic sweep, following the checkpoint
// sweeper pattern used throughout the pipeline's background tasks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::common::BoundedHashMap;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcknowledgmentStatus {
    Acknowledged,
    Failed,
    Pending,
}

#[derive(Debug, Clone)]
pub struct AcknowledgmentRecord {
    pub status: AcknowledgmentStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, event_digest: &str) -> Result<()>;
    async fn sweep_expired(&self);
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn contains(&self, content_hash: &str) -> Result<bool>;
    async fn put(&self, content_hash: &str) -> Result<()>;
    async fn sweep_expired(&self);
}

#[async_trait]
pub trait AckStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<AcknowledgmentRecord>>;
    async fn put(&self, key: &str, record: AcknowledgmentRecord) -> Result<()>;
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

pub struct InMemoryIdempotencyStore {
    map: Mutex<BoundedHashMap<String, Entry<String>>>,
    ttl: Duration,
}

impl InMemoryIdempotencyStore {
    pub fn new(max_keys: usize, ttl: Duration) -> Self {
        Self {
            map: Mutex::new(BoundedHashMap::new(max_keys.max(1))),
            ttl,
        }
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut map = self.map.lock();
        match map.get(&key.to_string()) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => Ok(Some(entry.value.clone())),
            Some(_) => {
                map.remove(&key.to_string());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, event_digest: &str) -> Result<()> {
        self.map.lock().insert(
            key.to_string(),
            Entry {
                value: event_digest.to_string(),
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn sweep_expired(&self) {
        let mut map = self.map.lock();
        let expired: Vec<String> = map
            .iter()
            .filter(|(_, e)| e.stored_at.elapsed() > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            map.remove(&key);
        }
    }
}

pub struct InMemoryDedupStore {
    map: Mutex<BoundedHashMap<String, Instant>>,
    window: Duration,
}

impl InMemoryDedupStore {
    pub fn new(max_entries: usize, window: Duration) -> Self {
        Self {
            map: Mutex::new(BoundedHashMap::new(max_entries.max(1))),
            window,
        }
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn contains(&self, content_hash: &str) -> Result<bool> {
        let mut map = self.map.lock();
        match map.get(&content_hash.to_string()) {
            Some(stored_at) if stored_at.elapsed() <= self.window => Ok(true),
            Some(_) => {
                map.remove(&content_hash.to_string());
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn put(&self, content_hash: &str) -> Result<()> {
        self.map.lock().insert(content_hash.to_string(), Instant::now());
        Ok(())
    }

    async fn sweep_expired(&self) {
        let mut map = self.map.lock();
        let expired: Vec<String> = map
            .iter()
            .filter(|(_, stored_at)| stored_at.elapsed() > self.window)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            map.remove(&key);
        }
    }
}

pub struct InMemoryAckStore {
    map: Mutex<BoundedHashMap<String, AcknowledgmentRecord>>,
}

impl InMemoryAckStore {
    pub fn new(max_keys: usize) -> Self {
        Self {
            map: Mutex::new(BoundedHashMap::new(max_keys.max(1))),
        }
    }
}

#[async_trait]
impl AckStore for InMemoryAckStore {
    async fn get(&self, key: &str) -> Result<Option<AcknowledgmentRecord>> {
        Ok(self.map.lock().get(&key.to_string()).cloned())
    }

    async fn put(&self, key: &str, record: AcknowledgmentRecord) -> Result<()> {
        self.map.lock().insert(key.to_string(), record);
        Ok(())
    }
}

/// Spawn a periodic sweeper that evicts TTL-expired idempotency and dedup
/// entries, mirroring the reference crate's background checkpoint tasks.
pub fn spawn_ttl_sweeper(
    idempotency: std::sync::Arc<dyn IdempotencyStore>,
    dedup: std::sync::Arc<dyn DedupStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    idempotency.sweep_expired().await;
                    dedup.sweep_expired().await;
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idempotency_entries_expire_after_ttl() {
        let store = InMemoryIdempotencyStore::new(10, Duration::from_millis(20));
        store.put("key-1", "digest").await.unwrap();
        assert!(store.get("key-1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("key-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dedup_store_honors_window() {
        let store = InMemoryDedupStore::new(10, Duration::from_millis(20));
        store.put("hash-1").await.unwrap();
        assert!(store.contains("hash-1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!store.contains("hash-1").await.unwrap());
    }

    #[tokio::test]
    async fn ack_store_round_trips() {
        let store = InMemoryAckStore::new(10);
        store
            .put(
                "key-1",
                AcknowledgmentRecord {
                    status: AcknowledgmentStatus::Acknowledged,
                    attempts: 2,
                    error_message: None,
                },
            )
            .await
            .unwrap();
        let record = store.get("key-1").await.unwrap().unwrap();
        assert_eq!(record.attempts, 2);
    }
}
