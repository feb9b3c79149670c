//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;

use crate::store::{CheckpointID, CheckpointStore, StoredCheckpoint};

/// Filesystem implementation of CheckpointStore trait.
///
/// Stores one JSON file per checkpoint id (`<type>_<key>.json`). Writes go to a
/// temporary file first and are renamed into place so a crash never leaves a
/// truncated checkpoint behind.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, id: &CheckpointID) -> PathBuf {
        self.dir.join(format!("{}.json", id.file_stem()))
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create checkpoint dir {}", self.dir.display())
        })?;

        let stored = StoredCheckpoint {
            checkpoint_data,
            checkpoint_type: id.checkpoint_type.clone(),
            key: id.key.clone(),
            created_at: Utc::now(),
        };

        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&stored)?)?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move checkpoint into {}", path.display()))?;

        tracing::debug!("Stored checkpoint to {}", path.display());
        Ok(())
    }

    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<StoredCheckpoint>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn list_checkpoints(&self) -> Result<Vec<StoredCheckpoint>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut checkpoints = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_json = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == "json")
                .unwrap_or(false);
            if !is_json {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<StoredCheckpoint>(&content) {
                Ok(stored) => checkpoints.push(stored),
                Err(e) => tracing::warn!("Ignoring unreadable checkpoint {}: {e}", path.display()),
            }
        }

        checkpoints.sort_by(|a, b| {
            (a.checkpoint_type.as_str(), a.key.as_str())
                .cmp(&(b.checkpoint_type.as_str(), b.key.as_str()))
        });
        Ok(checkpoints)
    }
}
