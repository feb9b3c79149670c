//! In-memory checkpoint storage.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::store::{CheckpointID, CheckpointStore, StoredCheckpoint};

/// Process-local checkpoint store. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<(String, String), StoredCheckpoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()> {
        let stored = StoredCheckpoint {
            checkpoint_data,
            checkpoint_type: id.checkpoint_type.clone(),
            key: id.key.clone(),
            created_at: Utc::now(),
        };
        self.entries
            .lock()
            .await
            .insert((id.checkpoint_type.clone(), id.key.clone()), stored);
        Ok(())
    }

    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<StoredCheckpoint>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(&(id.checkpoint_type.clone(), id.key.clone()))
            .cloned())
    }

    async fn list_checkpoints(&self) -> Result<Vec<StoredCheckpoint>> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }
}
