// Subscription & dispatch engine: fans events from adapters through
// filters to subscriber callbacks, batching and bounding concurrency per
// subscription.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info_span, warn, Instrument};

use crate::common::{SchemaName, SourceId, TableName};
use crate::error::Result;
use crate::events::ChangeEvent;

/// Async callback invoked with a batch of matching events.
pub type BatchHandler = Arc<dyn Fn(Vec<ChangeEvent>) -> Result<()> + Send + Sync>;

/// Predicate evaluated per event before it is batched.
pub type Predicate = Arc<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct SubscriptionOptions {
    pub source: SourceId,
    pub schema: Option<SchemaName>,
    pub table: Option<TableName>,
    pub predicate: Option<Predicate>,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub include_images: bool,
    pub max_concurrency: usize,
}

impl SubscriptionOptions {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            schema: None,
            table: None,
            predicate: None,
            batch_size: 100,
            flush_interval: Duration::from_millis(500),
            include_images: true,
            max_concurrency: 1,
        }
    }

    fn matches(&self, event: &ChangeEvent) -> bool {
        if event.source != self.source {
            return false;
        }
        if let Some(schema) = &self.schema {
            if &event.schema != schema {
                return false;
            }
        }
        if let Some(table) = &self.table {
            if &event.table != table {
                return false;
            }
        }
        self.predicate.as_ref().map(|p| p(event)).unwrap_or(true)
    }
}

/// Live handle returned on subscribe. Dropping it without calling
/// `dispose` still deregisters the subscription, via `Drop`.
pub struct SubscriptionHandle {
    id: u64,
    engine: Arc<SubscriptionEngineInner>,
    disposed: AtomicBool,
}

impl SubscriptionHandle {
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.engine.remove_subscription(self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct Subscription {
    options: SubscriptionOptions,
    sender: mpsc::Sender<ChangeEvent>,
    flush_task: JoinHandle<()>,
}

struct SubscriptionEngineInner {
    subscriptions: parking_lot::RwLock<std::collections::HashMap<u64, Subscription>>,
    next_id: AtomicU64,
}

impl SubscriptionEngineInner {
    fn remove_subscription(&self, id: u64) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            sub.flush_task.abort();
        }
    }
}

/// Routes incoming events to every matching subscription, batches per
/// subscription, and invokes the handler with up to `max_concurrency`
/// concurrent calls.
pub struct SubscriptionEngine {
    inner: Arc<SubscriptionEngineInner>,
}

impl Default for SubscriptionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubscriptionEngineInner {
                subscriptions: parking_lot::RwLock::new(std::collections::HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self, options: SubscriptionOptions, handler: BatchHandler) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::channel::<ChangeEvent>(options.batch_size.max(1) * 4);

        let batch_size = options.batch_size.max(1);
        let flush_interval = options.flush_interval;
        let max_concurrency = options.max_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let handler = handler.clone();

        let flush_task = tokio::spawn(async move {
            let mut buffer = Vec::with_capacity(batch_size);
            let mut ticker = tokio::time::interval(flush_interval);
            loop {
                tokio::select! {
                    maybe_event = rx.recv() => {
                        match maybe_event {
                            Some(event) => {
                                buffer.push(event);
                                if buffer.len() >= batch_size {
                                    Self::flush(&mut buffer, &handler, &semaphore).await;
                                }
                            }
                            None => {
                                if !buffer.is_empty() {
                                    Self::flush(&mut buffer, &handler, &semaphore).await;
                                }
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if !buffer.is_empty() {
                            Self::flush(&mut buffer, &handler, &semaphore).await;
                        }
                    }
                }
            }
        });

        self.inner.subscriptions.write().insert(
            id,
            Subscription {
                options,
                sender: tx,
                flush_task,
            },
        );

        SubscriptionHandle {
            id,
            engine: self.inner.clone(),
            disposed: AtomicBool::new(false),
        }
    }

    async fn flush(buffer: &mut Vec<ChangeEvent>, handler: &BatchHandler, semaphore: &Arc<Semaphore>) {
        let batch = std::mem::take(buffer);
        let permit = semaphore.clone().acquire_owned().await;
        let handler = handler.clone();
        let span = info_span!("dispatch.flush", batch_size = batch.len());
        async move {
            if let Err(err) = handler(batch) {
                warn!(error = %err, "subscriber handler returned an error");
            }
            drop(permit);
        }
        .instrument(span)
        .await;
    }

    /// Route one incoming event to every subscription whose filter matches.
    /// Events for a single `(source, schema, table)` arrive through this
    /// method in adapter-delivered order, which callers must preserve by
    /// calling `dispatch` sequentially per stream.
    pub async fn dispatch(&self, event: ChangeEvent) {
        let senders: Vec<mpsc::Sender<ChangeEvent>> = {
            let subs = self.inner.subscriptions.read();
            subs.values()
                .filter(|s| s.options.matches(&event))
                .map(|s| s.sender.clone())
                .collect()
        };
        for sender in senders {
            if sender.send(event.clone()).await.is_err() {
                warn!("subscription channel closed while dispatching event");
            }
        }
    }

    pub fn active_subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Operation;
    use std::sync::Mutex;

    fn event(table: &str) -> ChangeEvent {
        ChangeEvent::builder("src-A", Operation::Insert)
            .schema("public")
            .table(table)
            .offset("1")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn dispatch_routes_only_matching_events() {
        let engine = SubscriptionEngine::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();

        let mut options = SubscriptionOptions::new("src-A");
        options.table = Some("users".to_string());
        options.batch_size = 1;
        options.flush_interval = Duration::from_millis(5);

        let handle = engine.subscribe(
            options,
            Arc::new(move |batch: Vec<ChangeEvent>| {
                received2.lock().unwrap().extend(batch.into_iter().map(|e| e.table));
                Ok(())
            }),
        );

        engine.dispatch(event("users")).await;
        engine.dispatch(event("orders")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(received.lock().unwrap().as_slice(), ["users"]);
        handle.dispose();
    }

    #[tokio::test]
    async fn dispose_deregisters_subscription() {
        let engine = SubscriptionEngine::new();
        let options = SubscriptionOptions::new("src-A");
        let handle = engine.subscribe(options, Arc::new(|_batch| Ok(())));
        assert_eq!(engine.active_subscription_count(), 1);
        handle.dispose();
        assert_eq!(engine.active_subscription_count(), 0);
    }

    #[tokio::test]
    async fn drop_without_explicit_dispose_still_deregisters() {
        let engine = SubscriptionEngine::new();
        let options = SubscriptionOptions::new("src-A");
        {
            let _handle = engine.subscribe(options, Arc::new(|_batch| Ok(())));
            assert_eq!(engine.active_subscription_count(), 1);
        }
        assert_eq!(engine.active_subscription_count(), 0);
    }
}
