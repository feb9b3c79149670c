//! Checkpoint storage trait and types
//!
//! This module defines the CheckpointStore trait for backend-agnostic
//! checkpoint storage operations, plus shared types.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checkpoint identifier for storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointID {
    /// Checkpoint type (e.g., "watermark")
    pub checkpoint_type: String,
    /// Key within the type, e.g. the tracked table name
    pub key: String,
}

impl CheckpointID {
    pub fn new(checkpoint_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            checkpoint_type: checkpoint_type.into(),
            key: key.into(),
        }
    }

    /// File-name friendly form: `<type>_<key>`
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.checkpoint_type, self.key)
    }
}

/// Checkpoint data stored in backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    /// Serialized checkpoint (JSON)
    pub checkpoint_data: String,
    /// Checkpoint type for validation
    pub checkpoint_type: String,
    /// Key the checkpoint was stored under
    pub key: String,
    /// Timestamp when checkpoint was stored
    pub created_at: DateTime<Utc>,
}

/// Trait for checkpoint storage operations.
///
/// Each `(checkpoint_type, key)` pair holds at most one checkpoint; storing
/// again replaces the previous value.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store a checkpoint in the storage backend.
    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()>;

    /// Read a checkpoint from the storage backend.
    ///
    /// Returns None if the checkpoint doesn't exist.
    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<StoredCheckpoint>>;

    /// List every stored checkpoint, ordered by type then key.
    async fn list_checkpoints(&self) -> Result<Vec<StoredCheckpoint>>;
}
