// Publisher contract, serializer, and registry.
//
// A publisher delivers a `ChangeEvent` (or batch) to one sink. Publishers
// may retry internally but must be safe to call again with the same event
// (the exactly-once manager may do exactly that), and must be safe to call
// concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SerializerFormat;
use crate::error::{CdcError, Result};
use crate::events::ChangeEvent;

pub mod broker;
pub mod deadletter;
pub mod webhook;

/// Outcome of a single `publish` call, distinct from `DeliveryResult`
/// (the exactly-once manager's wider envelope) — this is the publisher's
/// narrow yes/no.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl PublishOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Per-event failure detail for `publish_batch`'s partial-failure report.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub offset: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Contract every sink publisher implements.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, event: &ChangeEvent) -> Result<PublishOutcome>;

    /// Default batch implementation publishes sequentially and collects
    /// per-event failures; implementations that can fan out internally
    /// (e.g. a broker with partitioned writers) should override this.
    async fn publish_batch(&self, events: &[ChangeEvent]) -> Result<BatchOutcome> {
        let mut failures = Vec::new();
        for event in events {
            match self.publish(event).await {
                Ok(outcome) if !outcome.success => failures.push(BatchFailure {
                    offset: event.offset.clone(),
                    error: outcome.error.unwrap_or_else(|| "publish failed".to_string()),
                }),
                Err(err) => failures.push(BatchFailure {
                    offset: event.offset.clone(),
                    error: err.to_string(),
                }),
                Ok(_) => {}
            }
        }
        Ok(BatchOutcome { failures })
    }
}

#[derive(Default)]
pub struct PublisherRegistry {
    publishers: HashMap<String, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.insert(publisher.name().to_string(), publisher);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Publisher>> {
        self.publishers
            .get(name)
            .cloned()
            .ok_or_else(|| CdcError::NotFound(format!("publisher '{name}' is not registered")))
    }
}

/// Wire-format serialization of a `ChangeEvent`. `Protobuf`/`Avro` require
/// schema-registry integration out of this core's scope, so they are
/// modeled but not implemented.
pub trait EventSerializer: Send + Sync {
    fn format(&self) -> SerializerFormat;
    fn content_type(&self) -> &'static str;
    fn serialize(&self, event: &ChangeEvent) -> Result<Vec<u8>>;
}

pub struct JsonSerializer;

impl EventSerializer for JsonSerializer {
    fn format(&self) -> SerializerFormat {
        SerializerFormat::Json
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn serialize(&self, event: &ChangeEvent) -> Result<Vec<u8>> {
        serde_json::to_vec(event).map_err(|e| CdcError::Serialization(e.to_string()))
    }
}

pub struct MessagePackSerializer;

impl EventSerializer for MessagePackSerializer {
    fn format(&self) -> SerializerFormat {
        SerializerFormat::MessagePack
    }

    fn content_type(&self) -> &'static str {
        "application/msgpack"
    }

    fn serialize(&self, event: &ChangeEvent) -> Result<Vec<u8>> {
        rmp_serde::to_vec(event).map_err(|e| CdcError::Serialization(e.to_string()))
    }
}

pub struct UnimplementedSerializer {
    format: SerializerFormat,
}

impl UnimplementedSerializer {
    pub fn protobuf() -> Self {
        Self {
            format: SerializerFormat::Protobuf,
        }
    }

    pub fn avro() -> Self {
        Self {
            format: SerializerFormat::Avro,
        }
    }
}

impl EventSerializer for UnimplementedSerializer {
    fn format(&self) -> SerializerFormat {
        self.format
    }

    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }

    fn serialize(&self, _event: &ChangeEvent) -> Result<Vec<u8>> {
        Err(CdcError::NotImplemented(format!(
            "{:?} serialization requires schema-registry integration",
            self.format
        )))
    }
}

pub fn serializer_for(format: SerializerFormat) -> Arc<dyn EventSerializer> {
    match format {
        SerializerFormat::Json => Arc::new(JsonSerializer),
        SerializerFormat::MessagePack => Arc::new(MessagePackSerializer),
        SerializerFormat::Protobuf => Arc::new(UnimplementedSerializer::protobuf()),
        SerializerFormat::Avro => Arc::new(UnimplementedSerializer::avro()),
    }
}
