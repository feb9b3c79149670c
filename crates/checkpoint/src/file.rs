//! Checkpoint file wrapper for storage-agnostic serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoredCheckpoint;
use crate::Checkpoint;

/// Storage-agnostic checkpoint wrapper.
///
/// # File Format
///
/// ```json
/// {
///     "checkpoint_type": "watermark",
///     "key": "ticket_events",
///     "checkpoint": {
///         "table": "ticket_events",
///         "version": 102,
///         "timestamp": "2024-01-01T00:00:00Z"
///     },
///     "created_at": "2024-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    /// Checkpoint type identifier (e.g., "watermark")
    pub checkpoint_type: String,
    /// Key the checkpoint belongs to
    pub key: String,
    /// Serialized checkpoint data as JSON Value
    pub checkpoint: serde_json::Value,
    /// Timestamp when this checkpoint was written
    pub created_at: DateTime<Utc>,
}

impl CheckpointFile {
    /// Wrap a concrete checkpoint.
    pub fn new<C: Checkpoint>(checkpoint: &C, key: &str) -> anyhow::Result<Self> {
        Ok(Self {
            checkpoint_type: C::CHECKPOINT_TYPE.to_string(),
            key: key.to_string(),
            checkpoint: serde_json::to_value(checkpoint)?,
            created_at: Utc::now(),
        })
    }

    /// Rebuild from a stored record, whose `checkpoint_data` holds the JSON text.
    pub fn from_stored(stored: &StoredCheckpoint) -> anyhow::Result<Self> {
        Ok(Self {
            checkpoint_type: stored.checkpoint_type.clone(),
            key: stored.key.clone(),
            checkpoint: serde_json::from_str(&stored.checkpoint_data)?,
            created_at: stored.created_at,
        })
    }

    /// Parse checkpoint into the concrete type.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The `checkpoint_type` doesn't match `C::CHECKPOINT_TYPE`
    /// - The checkpoint data can't be deserialized into type `C`
    pub fn parse<C: Checkpoint>(&self) -> anyhow::Result<C> {
        if self.checkpoint_type != C::CHECKPOINT_TYPE {
            anyhow::bail!(
                "Checkpoint type mismatch: expected '{}', found '{}'",
                C::CHECKPOINT_TYPE,
                self.checkpoint_type
            );
        }
        Ok(serde_json::from_value(self.checkpoint.clone())?)
    }

    pub fn checkpoint_type(&self) -> &str {
        &self.checkpoint_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
