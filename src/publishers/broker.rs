// In-process broker-style publisher: topics, partitions, ordering
// guarantee, offset allocation. Stands in for a Kafka-like sink so the
// pipeline's delivery semantics can be exercised without a real broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::events::ChangeEvent;
use crate::publishers::{EventSerializer, PublishOutcome, Publisher};

/// How partition assignment and per-partition ordering is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingGuarantee {
    /// Partition by `(source, schema, table)`, preserving per-table order.
    PerTable,
    /// Single partition, global order within this publisher instance.
    Global,
    /// No ordering guarantee; partition chosen round-robin for max throughput.
    None,
}

struct Partition {
    next_offset: AtomicU64,
    log: RwLock<Vec<(u64, Vec<u8>)>>,
}

impl Partition {
    fn new() -> Self {
        Self {
            next_offset: AtomicU64::new(0),
            log: RwLock::new(Vec::new()),
        }
    }

    fn append(&self, payload: Vec<u8>) -> u64 {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        self.log.write().push((offset, payload));
        offset
    }
}

pub struct BrokerPublisher {
    name: String,
    topic: String,
    num_partitions: u32,
    ordering: OrderingGuarantee,
    serializer: Arc<dyn EventSerializer>,
    partitions: Vec<Partition>,
    round_robin: AtomicU64,
}

impl BrokerPublisher {
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        num_partitions: u32,
        ordering: OrderingGuarantee,
        serializer: Arc<dyn EventSerializer>,
    ) -> Self {
        let num_partitions = num_partitions.max(1);
        Self {
            name: name.into(),
            topic: topic.into(),
            num_partitions,
            ordering,
            serializer,
            partitions: (0..num_partitions).map(|_| Partition::new()).collect(),
            round_robin: AtomicU64::new(0),
        }
    }

    fn partition_for(&self, event: &ChangeEvent) -> usize {
        let key = match self.ordering {
            OrderingGuarantee::Global => 0,
            OrderingGuarantee::PerTable => {
                let mut hash: u64 = 0xcbf29ce484222325;
                for byte in format!("{}.{}.{}", event.source, event.schema, event.table).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(0x100000001b3);
                }
                hash
            }
            OrderingGuarantee::None => self.round_robin.fetch_add(1, Ordering::SeqCst),
        };
        (key % self.num_partitions as u64) as usize
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of messages appended to `partition`, for test assertions.
    pub fn partition_len(&self, partition: usize) -> usize {
        self.partitions[partition].log.read().len()
    }
}

#[async_trait]
impl Publisher for BrokerPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, event: &ChangeEvent) -> Result<PublishOutcome> {
        let payload = match self.serializer.serialize(event) {
            Ok(bytes) => bytes,
            Err(err) => return Ok(PublishOutcome::failed(err.to_string())),
        };
        let partition = self.partition_for(event);
        self.partitions[partition].append(payload);
        Ok(PublishOutcome::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Operation;
    use crate::publishers::serializer_for;
    use crate::config::SerializerFormat;

    fn event(table: &str, offset: &str) -> ChangeEvent {
        ChangeEvent::builder("src-A", Operation::Insert)
            .schema("public")
            .table(table)
            .offset(offset)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn per_table_ordering_routes_same_table_to_same_partition() {
        let publisher = BrokerPublisher::new(
            "kafka-like",
            "changes",
            4,
            OrderingGuarantee::PerTable,
            serializer_for(SerializerFormat::Json),
        );
        publisher.publish(&event("users", "1")).await.unwrap();
        publisher.publish(&event("users", "2")).await.unwrap();
        publisher.publish(&event("orders", "1")).await.unwrap();

        let total: usize = (0..4).map(|p| publisher.partition_len(p)).sum();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn global_ordering_uses_single_partition() {
        let publisher = BrokerPublisher::new(
            "kafka-like",
            "changes",
            4,
            OrderingGuarantee::Global,
            serializer_for(SerializerFormat::Json),
        );
        publisher.publish(&event("users", "1")).await.unwrap();
        publisher.publish(&event("orders", "1")).await.unwrap();
        assert_eq!(publisher.partition_len(0), 2);
    }
}
