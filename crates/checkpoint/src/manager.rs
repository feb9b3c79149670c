//! Typed checkpoint manager on top of a `CheckpointStore`.

use std::sync::Arc;

use crate::{store::CheckpointStore, Checkpoint, CheckpointFile, CheckpointID};

/// Manager for saving and loading typed checkpoints.
///
/// # Example
///
/// ```rust,ignore
/// use checkpoint::{CheckpointManager, FilesystemStore};
///
/// let manager = CheckpointManager::new(Arc::new(FilesystemStore::new("/var/lib/pos-bridge")));
/// manager.save("ticket_events", &WatermarkCheckpoint::new("ticket_events", 102)).await?;
/// let loaded: Option<WatermarkCheckpoint> = manager.load("ticket_events").await?;
/// ```
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Manager over a process-local store. Nothing survives a restart.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(crate::MemoryStore::new()))
    }

    /// Persist `checkpoint` under `key`, replacing any previous value.
    pub async fn save<C: Checkpoint>(&self, key: &str, checkpoint: &C) -> anyhow::Result<()> {
        let id = CheckpointID::new(C::CHECKPOINT_TYPE, key);
        let checkpoint_data = serde_json::to_string(checkpoint)?;
        self.store.store_checkpoint(&id, checkpoint_data).await?;

        tracing::debug!(
            "Saved {} checkpoint for '{}': {}",
            C::CHECKPOINT_TYPE,
            key,
            checkpoint.to_cli_string()
        );
        Ok(())
    }

    /// Load the checkpoint stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored type doesn't match `C::CHECKPOINT_TYPE`
    /// or the data can't be deserialized.
    pub async fn load<C: Checkpoint>(&self, key: &str) -> anyhow::Result<Option<C>> {
        let id = CheckpointID::new(C::CHECKPOINT_TYPE, key);
        match self.store.read_checkpoint(&id).await? {
            Some(stored) => {
                let file = CheckpointFile::from_stored(&stored)?;
                Ok(Some(file.parse::<C>()?))
            }
            None => Ok(None),
        }
    }

    /// Every stored checkpoint, regardless of type.
    pub async fn list(&self) -> anyhow::Result<Vec<CheckpointFile>> {
        self.store
            .list_checkpoints()
            .await?
            .iter()
            .map(CheckpointFile::from_stored)
            .collect()
    }
}
