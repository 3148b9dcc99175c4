// Exactly-once delivery manager.
//
// Provides at-most-once visible effect at sinks despite at-least-once
// delivery from adapters: compute an idempotency key, check it against the
// idempotency/dedup stores before touching the publisher, retry with
// backoff on failure, and record the outcome so replay short-circuits.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{info_span, warn, Instrument};

use crate::config::{AcknowledgmentConfig, ExactlyOnceConfig, KeyStrategy, RetryConfig};
use crate::error::Result;
use crate::events::ChangeEvent;
use crate::publishers::Publisher;

pub mod stores;

pub use stores::{AckStore, AcknowledgmentRecord, AcknowledgmentStatus, DedupStore, IdempotencyStore};

/// Outcome of a single `deliver_exactly_once` call.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub success: bool,
    pub is_duplicate: bool,
    pub attempts: u32,
    pub failed_event_count: u32,
    pub last_error: Option<String>,
}

impl DeliveryResult {
    fn duplicate() -> Self {
        Self {
            success: true,
            is_duplicate: true,
            attempts: 1,
            failed_event_count: 0,
            last_error: None,
        }
    }

    fn success(attempts: u32) -> Self {
        Self {
            success: true,
            is_duplicate: false,
            attempts,
            failed_event_count: 0,
            last_error: None,
        }
    }

    fn failure(attempts: u32, failed_event_count: u32, error: String) -> Self {
        Self {
            success: false,
            is_duplicate: false,
            attempts,
            failed_event_count,
            last_error: Some(error),
        }
    }
}

fn compute_key(event: &ChangeEvent, strategy: KeyStrategy) -> String {
    match strategy {
        KeyStrategy::Offset => format!("{}:{}", event.source, event.offset),
        KeyStrategy::ContentHash | KeyStrategy::Composite => {
            let mut hasher = Sha256::new();
            match strategy {
                KeyStrategy::ContentHash => {
                    hasher.update(format!("{:?}", event.before).as_bytes());
                    hasher.update(format!("{:?}", event.after).as_bytes());
                    let mut meta: Vec<_> = event.metadata.iter().collect();
                    meta.sort();
                    hasher.update(format!("{:?}", meta).as_bytes());
                }
                _ => {
                    hasher.update(event.source.as_bytes());
                    hasher.update(event.schema.as_bytes());
                    hasher.update(event.table.as_bytes());
                    hasher.update(format!("{:?}", event.operation).as_bytes());
                    hasher.update(event.offset.as_bytes());
                    hasher.update(
                        crate::events::unix_millis(event.timestamp_utc)
                            .to_string()
                            .as_bytes(),
                    );
                }
            }
            hex::encode(hasher.finalize())
        }
    }
}

fn content_hash(event: &ChangeEvent) -> String {
    let mut hasher = DefaultHasher::new();
    format!("{:?}", event.before).hash(&mut hasher);
    format!("{:?}", event.after).hash(&mut hasher);
    hasher.finish().to_string()
}

pub struct ExactlyOnceManager {
    config: ExactlyOnceConfig,
    idempotency_store: Arc<dyn IdempotencyStore>,
    dedup_store: Arc<dyn DedupStore>,
    ack_store: Arc<dyn AckStore>,
    admission: Arc<Semaphore>,
    key_locks: Arc<DashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ExactlyOnceManager {
    pub fn new(
        config: ExactlyOnceConfig,
        idempotency_store: Arc<dyn IdempotencyStore>,
        dedup_store: Arc<dyn DedupStore>,
        ack_store: Arc<dyn AckStore>,
    ) -> Self {
        let admission = Arc::new(Semaphore::new(config.max_concurrent_deliveries.max(1)));
        Self {
            config,
            idempotency_store,
            dedup_store,
            ack_store,
            admission,
            key_locks: Arc::new(DashMap::new()),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn deliver_exactly_once(
        &self,
        event: &ChangeEvent,
        publisher: &Arc<dyn Publisher>,
    ) -> Result<DeliveryResult> {
        let key = compute_key(event, self.config.idempotency.key_strategy);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let already_delivered = match self.idempotency_store.get(&key).await {
            Ok(record) => record.is_some(),
            Err(err) => {
                warn!(error = %err, "idempotency store read failed, continuing (fail-open)");
                false
            }
        };
        if already_delivered {
            return Ok(DeliveryResult::duplicate());
        }

        let hash = content_hash(event);
        if self.config.deduplication.enabled {
            let is_duplicate = match self.dedup_store.contains(&hash).await {
                Ok(seen) => seen,
                Err(err) => {
                    warn!(error = %err, "dedup store read failed, continuing (fail-open)");
                    false
                }
            };
            if is_duplicate {
                return Ok(DeliveryResult::duplicate());
            }
        }

        let _permit = self
            .admission
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore never closed");

        let span = info_span!("process", source = %event.source, schema = %event.schema, table = %event.table, offset = %event.offset);
        let result = self.attempt_with_retry(event, publisher).instrument(span).await;

        match &result {
            Ok(delivered) if delivered.success => {
                if let Err(err) = self.idempotency_store.put(&key, &hash).await {
                    warn!(error = %err, "idempotency store write failed, continuing (fail-open)");
                }
                if self.config.deduplication.enabled {
                    if let Err(err) = self.dedup_store.put(&hash).await {
                        warn!(error = %err, "dedup store write failed, continuing (fail-open)");
                    }
                }
                if self.config.acknowledgment.required {
                    self.acknowledge(
                        &key,
                        AcknowledgmentRecord {
                            status: AcknowledgmentStatus::Acknowledged,
                            attempts: delivered.attempts,
                            error_message: None,
                        },
                        &self.config.acknowledgment,
                    )
                    .await;
                }
            }
            Ok(failed) => {
                if self.config.acknowledgment.required {
                    self.acknowledge(
                        &key,
                        AcknowledgmentRecord {
                            status: AcknowledgmentStatus::Failed,
                            attempts: failed.attempts,
                            error_message: failed.last_error.clone(),
                        },
                        &self.config.acknowledgment,
                    )
                    .await;
                }
            }
            Err(_) => {}
        }

        result
    }

    /// Deliver every event in a group; group success requires all events
    /// succeed, group `is_duplicate` requires all events be duplicates.
    pub async fn deliver_group_exactly_once(
        &self,
        events: &[ChangeEvent],
        publisher: &Arc<dyn Publisher>,
    ) -> Result<DeliveryResult> {
        let mut all_duplicate = true;
        let mut failed_count = 0u32;
        let mut last_error = None;
        let mut max_attempts = 0u32;

        for event in events {
            let outcome = self.deliver_exactly_once(event, publisher).await?;
            max_attempts = max_attempts.max(outcome.attempts);
            if !outcome.is_duplicate {
                all_duplicate = false;
            }
            if !outcome.success {
                failed_count += 1;
                last_error = outcome.last_error.or(last_error);
            }
        }

        if failed_count > 0 {
            return Ok(DeliveryResult::failure(
                max_attempts,
                failed_count,
                last_error.unwrap_or_else(|| "one or more events failed delivery".to_string()),
            ));
        }
        if all_duplicate {
            return Ok(DeliveryResult::duplicate());
        }
        Ok(DeliveryResult::success(max_attempts))
    }

    async fn attempt_with_retry(
        &self,
        event: &ChangeEvent,
        publisher: &Arc<dyn Publisher>,
    ) -> Result<DeliveryResult> {
        let retry = &self.config.retry;
        let mut delay = Duration::from_secs_f64(retry.initial_delay_seconds);
        let mut attempts = 0u32;
        let mut last_error = String::new();

        loop {
            attempts += 1;
            let started = Instant::now();
            match publisher.publish(event).await {
                Ok(outcome) if outcome.success => {
                    return Ok(DeliveryResult::success(attempts));
                }
                Ok(outcome) => {
                    last_error = outcome.error.unwrap_or_else(|| "publish failed".to_string());
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }
            warn!(attempt = attempts, elapsed_ms = started.elapsed().as_millis() as u64, error = %last_error, "publish attempt failed");

            if attempts >= retry.max_attempts {
                return Ok(DeliveryResult::failure(attempts, 1, last_error));
            }
            tokio::time::sleep(delay).await;
            delay = next_delay(delay, retry);
        }
    }

    async fn acknowledge(&self, key: &str, record: AcknowledgmentRecord, _config: &AcknowledgmentConfig) {
        if let Err(err) = self.ack_store.put(key, record).await {
            warn!(error = %err, "ack store write failed, continuing (fail-open)");
        }
    }

    pub async fn get_delivery_status(&self, idempotency_key: &str) -> Result<Option<AcknowledgmentRecord>> {
        self.ack_store.get(idempotency_key).await
    }
}

fn next_delay(current: Duration, retry: &RetryConfig) -> Duration {
    let next_secs = current.as_secs_f64() * retry.backoff_multiplier;
    Duration::from_secs_f64(next_secs.min(retry.max_delay_seconds))
}

/// Convenience constructor wiring the default in-memory stores sized per
/// `config`, used by tests and simple single-process deployments.
pub fn in_memory_manager(config: ExactlyOnceConfig) -> ExactlyOnceManager {
    let idempotency = Arc::new(stores::InMemoryIdempotencyStore::new(
        config.idempotency.max_keys,
        Duration::from_secs(config.idempotency.key_ttl_seconds),
    ));
    let dedup = Arc::new(stores::InMemoryDedupStore::new(
        config.deduplication.max_entries,
        Duration::from_secs(config.deduplication.window_seconds),
    ));
    let ack = Arc::new(stores::InMemoryAckStore::new(config.idempotency.max_keys));
    ExactlyOnceManager::new(config, idempotency, dedup, ack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExactlyOnceConfig;
    use crate::events::Operation;
    use crate::publishers::PublishOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyPublisher {
        fail_until_attempt: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Publisher for FlakyPublisher {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn publish(&self, _event: &ChangeEvent) -> Result<PublishOutcome> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.fail_until_attempt {
                Ok(PublishOutcome::failed("simulated transient failure"))
            } else {
                Ok(PublishOutcome::ok())
            }
        }
    }

    fn event(offset: &str) -> ChangeEvent {
        ChangeEvent::builder("src-A", Operation::Insert)
            .schema("public")
            .table("users")
            .offset(offset)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn retries_then_succeeds_and_records_idempotency() {
        let mut config = ExactlyOnceConfig::default();
        config.retry.initial_delay_seconds = 0.001;
        config.retry.max_delay_seconds = 0.002;
        let manager = in_memory_manager(config);
        let publisher: Arc<dyn Publisher> = Arc::new(FlakyPublisher {
            fail_until_attempt: 3,
            attempts: AtomicU32::new(0),
        });

        let result = manager.deliver_exactly_once(&event("1"), &publisher).await.unwrap();
        assert!(result.success);
        assert!(!result.is_duplicate);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn redelivery_of_same_offset_is_reported_as_duplicate() {
        let manager = in_memory_manager(ExactlyOnceConfig::default());
        let publisher: Arc<dyn Publisher> = Arc::new(FlakyPublisher {
            fail_until_attempt: 1,
            attempts: AtomicU32::new(0),
        });

        let first = manager.deliver_exactly_once(&event("1"), &publisher).await.unwrap();
        assert!(first.success && !first.is_duplicate);

        let second = manager.deliver_exactly_once(&event("1"), &publisher).await.unwrap();
        assert!(second.success && second.is_duplicate);
    }

    #[tokio::test]
    async fn group_delivery_fails_if_any_event_fails() {
        let mut config = ExactlyOnceConfig::default();
        config.retry.max_attempts = 1;
        config.retry.initial_delay_seconds = 0.001;
        let manager = in_memory_manager(config);

        struct AlwaysFail;
        #[async_trait]
        impl Publisher for AlwaysFail {
            fn name(&self) -> &str {
                "always-fail"
            }
            async fn publish(&self, _e: &ChangeEvent) -> Result<PublishOutcome> {
                Ok(PublishOutcome::failed("nope"))
            }
        }
        let publisher: Arc<dyn Publisher> = Arc::new(AlwaysFail);

        let events = vec![event("1"), event("2")];
        let result = manager.deliver_group_exactly_once(&events, &publisher).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_event_count, 2);
    }
}
