// Dead-letter wrapper: delegates to an inner publisher and, after a
// configurable run of consecutive failures, routes further events straight
// to the dead-letter sink instead of retrying the inner publisher.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::events::ChangeEvent;
use crate::publishers::{PublishOutcome, Publisher};

pub struct DeadLetterPublisher {
    name: String,
    inner: Arc<dyn Publisher>,
    dead_letter_sink: Arc<dyn Publisher>,
    consecutive_failure_threshold: u32,
    consecutive_failures: AtomicU32,
}

impl DeadLetterPublisher {
    pub fn new(
        name: impl Into<String>,
        inner: Arc<dyn Publisher>,
        dead_letter_sink: Arc<dyn Publisher>,
        consecutive_failure_threshold: u32,
    ) -> Self {
        Self {
            name: name.into(),
            inner,
            dead_letter_sink,
            consecutive_failure_threshold,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    fn tripped(&self) -> bool {
        self.consecutive_failures.load(Ordering::SeqCst) >= self.consecutive_failure_threshold
    }
}

#[async_trait]
impl Publisher for DeadLetterPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, event: &ChangeEvent) -> Result<PublishOutcome> {
        if self.tripped() {
            warn!(
                publisher = %self.name,
                offset = %event.offset,
                "consecutive failure threshold crossed, routing directly to dead letter"
            );
            return self.dead_letter_sink.publish(event).await;
        }

        match self.inner.publish(event).await {
            Ok(outcome) if outcome.success => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                Ok(outcome)
            }
            Ok(outcome) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.consecutive_failure_threshold {
                    warn!(
                        publisher = %self.name,
                        failures,
                        "consecutive failure threshold reached, routing to dead letter"
                    );
                    return self.dead_letter_sink.publish(event).await;
                }
                Ok(outcome)
            }
            Err(err) => {
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Operation;
    use std::sync::Mutex;

    struct AlwaysFail;
    #[async_trait]
    impl Publisher for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn publish(&self, _event: &ChangeEvent) -> Result<PublishOutcome> {
            Ok(PublishOutcome::failed("simulated failure"))
        }
    }

    struct RecordingSink {
        received: Mutex<Vec<String>>,
    }
    impl RecordingSink {
        fn new() -> Self {
            Self {
                received: Mutex::new(Vec::new()),
            }
        }
    }
    #[async_trait]
    impl Publisher for RecordingSink {
        fn name(&self) -> &str {
            "dead-letter-sink"
        }
        async fn publish(&self, event: &ChangeEvent) -> Result<PublishOutcome> {
            self.received.lock().unwrap().push(event.offset.clone());
            Ok(PublishOutcome::ok())
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
    async fn routes_to_dead_letter_after_threshold() {
        let sink = Arc::new(RecordingSink::new());
        let publisher = DeadLetterPublisher::new("guarded", Arc::new(AlwaysFail), sink.clone(), 2);

        let outcome1 = publisher.publish(&event("1")).await.unwrap();
        assert!(!outcome1.success);
        assert!(sink.received.lock().unwrap().is_empty());

        let outcome2 = publisher.publish(&event("2")).await.unwrap();
        assert!(outcome2.success);
        assert_eq!(sink.received.lock().unwrap().len(), 1);

        let outcome3 = publisher.publish(&event("3")).await.unwrap();
        assert!(outcome3.success);
        assert_eq!(sink.received.lock().unwrap().len(), 2);
    }
}
