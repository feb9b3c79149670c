//! Per-table change-log watermarks.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use checkpoint::{Checkpoint, CheckpointManager};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Last change-log version processed for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkCheckpoint {
    pub table: String,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
}

impl WatermarkCheckpoint {
    pub fn new(table: impl Into<String>, version: i64) -> Self {
        Self {
            table: table.into(),
            version,
            timestamp: Utc::now(),
        }
    }
}

impl Checkpoint for WatermarkCheckpoint {
    const CHECKPOINT_TYPE: &'static str = "watermark";

    fn to_cli_string(&self) -> String {
        format!("{}:{}", self.table, self.version)
    }

    fn from_cli_string(s: &str) -> anyhow::Result<Self> {
        let (table, version) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid watermark '{s}', expected <table>:<version>"))?;
        if table.is_empty() {
            anyhow::bail!("Invalid watermark '{s}': empty table name");
        }
        bridge_core::validate_identifier(table)
            .map_err(|e| anyhow::anyhow!("Invalid watermark '{s}': {e}"))?;
        let version: i64 = version
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid watermark version in '{s}': {e}"))?;
        if version < 0 {
            anyhow::bail!("Invalid watermark '{s}': version must not be negative");
        }
        Ok(Self::new(table, version))
    }
}

/// In-memory watermarks. A watermark only ever moves forward.
#[derive(Debug, Default)]
pub struct Watermarks {
    versions: BTreeMap<String, i64>,
    dirty: BTreeSet<String>,
}

impl Watermarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str) -> Option<i64> {
        self.versions.get(table).copied()
    }

    /// Set the starting point for a table. Ignored if it would move backwards.
    pub fn initialize(&mut self, table: &str, version: i64) {
        let current = self.versions.entry(table.to_string()).or_insert(version);
        if version > *current {
            *current = version;
        }
    }

    /// Advance to `version` if it is ahead. Returns whether the watermark moved.
    pub fn advance(&mut self, table: &str, version: i64) -> bool {
        let current = self.versions.entry(table.to_string()).or_insert(0);
        if version <= *current {
            return false;
        }
        debug!("Watermark for {} advanced {} -> {}", table, current, version);
        *current = version;
        self.dirty.insert(table.to_string());
        true
    }

    /// Tables advanced since the last flush.
    pub fn take_dirty(&mut self) -> Vec<(String, i64)> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|table| self.versions.get(&table).map(|v| (table, *v)))
            .collect()
    }

    /// Queue a table for the next flush again, unless it has moved on since.
    pub fn mark_dirty(&mut self, table: &str, version: i64) {
        if self.versions.get(table).is_some_and(|v| *v >= version) {
            self.dirty.insert(table.to_string());
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.versions.clone()
    }

    pub fn clear(&mut self) {
        self.versions.clear();
        self.dirty.clear();
    }
}

/// Persist advanced watermarks through `manager`.
pub async fn flush_watermarks(
    manager: &CheckpointManager,
    advanced: &[(String, i64)],
) -> anyhow::Result<()> {
    for (table, version) in advanced {
        manager
            .save(table, &WatermarkCheckpoint::new(table.clone(), *version))
            .await?;
    }
    if !advanced.is_empty() {
        info!("Saved {} watermark checkpoint(s)", advanced.len());
    }
    Ok(())
}
