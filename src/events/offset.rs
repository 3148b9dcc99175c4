// Per-source offset persistence, used by adapters on restart to resume
// capture from the last durably recorded position.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::common::SourceId;
use crate::error::Result;

/// Durable store of "last committed offset" per source. Adapters call
/// `set_offset` after a checkpoint interval elapses and `get_offset` on
/// startup to decide where to resume.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    async fn get_offset(&self, source: &SourceId) -> Result<Option<String>>;
    async fn set_offset(&self, source: &SourceId, offset: String) -> Result<()>;
    async fn clear_offset(&self, source: &SourceId) -> Result<()>;
}

/// In-memory offset store. Adequate for tests and single-process
/// deployments; a durable backend would persist to the same storage as the
/// rest of the pipeline's checkpoints.
#[derive(Default)]
pub struct InMemoryOffsetStore {
    offsets: Arc<RwLock<HashMap<SourceId, String>>>,
}

impl InMemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetStore for InMemoryOffsetStore {
    async fn get_offset(&self, source: &SourceId) -> Result<Option<String>> {
        Ok(self.offsets.read().get(source).cloned())
    }

    async fn set_offset(&self, source: &SourceId, offset: String) -> Result<()> {
        self.offsets.write().insert(source.clone(), offset);
        Ok(())
    }

    async fn clear_offset(&self, source: &SourceId) -> Result<()> {
        self.offsets.write().remove(source);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_offsets_per_source() {
        let store = InMemoryOffsetStore::new();
        assert_eq!(store.get_offset(&"src-A".to_string()).await.unwrap(), None);

        store
            .set_offset(&"src-A".to_string(), "100".to_string())
            .await
            .unwrap();
        assert_eq!(
            store.get_offset(&"src-A".to_string()).await.unwrap(),
            Some("100".to_string())
        );

        store.clear_offset(&"src-A".to_string()).await.unwrap();
        assert_eq!(store.get_offset(&"src-A".to_string()).await.unwrap(), None);
    }
}
