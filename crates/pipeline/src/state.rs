//! Process-local pipeline state.
//!
//! Watermarks, dedup caches, the split tracker and the shift-closure filter
//! live in one `PipelineState` shared by every table processor. Nothing here
//! is visible to another process, so two bridges against one database will
//! double-publish except on tables that claim rows before processing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bridge_core::{ChangeSource, TableSpec};
use checkpoint::CheckpointManager;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::dedup::DedupCache;
use crate::policy::HeuristicPolicy;
use crate::shift::ShiftClosureFilter;
use crate::split::SplitTracker;
use crate::watermark::{WatermarkCheckpoint, Watermarks};

/// Current time on the runtime clock (follows `tokio::time::pause`).
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

pub struct PipelineState {
    policy: HeuristicPolicy,
    pub(crate) watermarks: Mutex<Watermarks>,
    pub(crate) dedup: Mutex<HashMap<String, DedupCache>>,
    pub(crate) splits: Mutex<SplitTracker>,
    pub(crate) closures: Mutex<ShiftClosureFilter>,
}

impl PipelineState {
    pub fn new(policy: HeuristicPolicy) -> Arc<Self> {
        let now = now();
        Arc::new(Self {
            watermarks: Mutex::new(Watermarks::new()),
            dedup: Mutex::new(HashMap::new()),
            splits: Mutex::new(SplitTracker::new(policy.split.clone(), now)),
            closures: Mutex::new(ShiftClosureFilter::new(policy.closeout.clone())),
            policy,
        })
    }

    pub fn policy(&self) -> &HeuristicPolicy {
        &self.policy
    }

    /// Forget everything: watermarks, caches and trackers.
    pub async fn reset(&self) {
        self.watermarks.lock().await.clear();
        self.dedup.lock().await.clear();
        self.splits.lock().await.clear();
        self.closures.lock().await.clear();
        info!("Pipeline state reset");
    }

    pub async fn watermark(&self, table: &str) -> Option<i64> {
        self.watermarks.lock().await.get(table)
    }

    pub async fn set_watermark(&self, table: &str, version: i64) {
        self.watermarks.lock().await.initialize(table, version);
    }

    pub async fn watermarks(&self) -> std::collections::BTreeMap<String, i64> {
        self.watermarks.lock().await.snapshot()
    }

    /// Seed each table's watermark from its stored checkpoint, or from the
    /// current change-log version when there is none.
    pub async fn initialize_watermarks(
        &self,
        source: &dyn ChangeSource,
        tables: &[TableSpec],
        checkpoints: Option<&CheckpointManager>,
    ) -> anyhow::Result<()> {
        for table in tables {
            let stored = match checkpoints {
                Some(manager) => manager.load::<WatermarkCheckpoint>(&table.name).await?,
                None => None,
            };
            let version = match stored {
                Some(cp) => {
                    info!(
                        "Resuming {} from checkpoint version {} (saved {})",
                        table.name, cp.version, cp.timestamp
                    );
                    cp.version
                }
                None => {
                    let current = source.current_version(table).await?;
                    info!("Starting {} at current change-log version {}", table.name, current);
                    current
                }
            };
            self.set_watermark(&table.name, version).await;
        }
        Ok(())
    }

    /// Run whichever housekeeping sweeps are due.
    pub async fn maintain(&self, now: Instant) {
        for (table, cache) in self.dedup.lock().await.iter_mut() {
            if cache.maybe_sweep(now).is_some() {
                let stats = cache.stats();
                debug!(
                    "{} dedup: {} cached, hits={} misses={} evicted={} expired={}",
                    table,
                    cache.len(),
                    stats.hits,
                    stats.misses,
                    stats.evicted,
                    stats.expired
                );
            }
        }
        self.splits.lock().await.maybe_sweep(now);
        self.closures.lock().await.expire(now);
    }

    /// Lookup-then-insert on the table's dedup cache.
    pub(crate) async fn seen_before(&self, table: &str, fingerprint: &str, now: Instant) -> bool {
        let mut caches = self.dedup.lock().await;
        caches
            .entry(table.to_string())
            .or_insert_with(|| DedupCache::new(&self.policy.dedup, now))
            .check_and_insert(fingerprint, now)
    }
}
