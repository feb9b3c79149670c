//! Adaptive polling loop.
//!
//! One loop, no overlapping cycles. Each cycle runs every table processor
//! concurrently, then sleeps for an interval that snaps to the minimum when any
//! table found work and grows by a fixed step after consecutive empty cycles.

use std::sync::Arc;
use std::time::Duration;

use checkpoint::CheckpointManager;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::policy::SchedulerPolicy;
use crate::processor::{CycleReport, TableProcessor};
use crate::state::{self, PipelineState};
use crate::watermark::flush_watermarks;

/// Polling interval with hysteresis.
#[derive(Debug, Clone)]
pub struct AdaptiveInterval {
    min: Duration,
    max: Duration,
    step: Duration,
    empty_cycles_before_backoff: u32,
    current: Duration,
    empty_streak: u32,
}

impl AdaptiveInterval {
    pub fn new(policy: &SchedulerPolicy) -> Self {
        Self {
            min: policy.min_interval,
            max: policy.max_interval.max(policy.min_interval),
            step: policy.step,
            empty_cycles_before_backoff: policy.empty_cycles_before_backoff.max(1),
            current: policy.min_interval,
            empty_streak: 0,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Retune after a completed cycle and return the delay before the next one.
    pub fn on_cycle(&mut self, found_work: bool) -> Duration {
        if found_work {
            self.empty_streak = 0;
            self.current = self.min;
        } else {
            self.empty_streak = self.empty_streak.saturating_add(1);
            if self.empty_streak >= self.empty_cycles_before_backoff {
                self.current = (self.current + self.step).min(self.max);
            }
        }
        self.current
    }

    /// A failed cycle waits the maximum interval once; the tuned value is kept.
    pub fn on_error(&mut self) -> Duration {
        self.max
    }
}

/// Aggregate of one scheduler cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub reports: Vec<CycleReport>,
    pub failed_tables: Vec<String>,
}

impl CycleSummary {
    pub fn found_work(&self) -> bool {
        self.reports.iter().any(CycleReport::found_work)
    }

    pub fn failed(&self) -> bool {
        !self.failed_tables.is_empty()
    }
}

pub struct Scheduler {
    processors: Vec<TableProcessor>,
    state: Arc<PipelineState>,
    checkpoints: Option<CheckpointManager>,
    interval: AdaptiveInterval,
    cycles: u64,
}

impl Scheduler {
    pub fn new(
        processors: Vec<TableProcessor>,
        state: Arc<PipelineState>,
        checkpoints: Option<CheckpointManager>,
    ) -> Self {
        let interval = AdaptiveInterval::new(&state.policy().scheduler);
        Self {
            processors,
            state,
            checkpoints,
            interval,
            cycles: 0,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// The flag is checked before each cycle; a cycle that has started always
    /// runs to completion.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            "Polling {} table(s), interval {:?}..{:?}",
            self.processors.len(),
            self.interval.min,
            self.interval.max
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let summary = self.run_once().await;
            let delay = if summary.failed() {
                let delay = self.interval.on_error();
                warn!(
                    "Cycle failed for {:?}; next cycle in {:?}",
                    summary.failed_tables, delay
                );
                delay
            } else {
                self.interval.on_cycle(summary.found_work())
            };
            debug!("Cycle {} done; sleeping {:?}", self.cycles, delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.flush_checkpoints().await;
        info!("Scheduler stopped after {} cycle(s)", self.cycles);
        Ok(())
    }

    /// One full cycle: housekeeping, all processors, checkpoint flush.
    pub async fn run_once(&mut self) -> CycleSummary {
        self.cycles += 1;
        self.state.maintain(state::now()).await;

        let results = join_all(self.processors.iter().map(|p| p.run_cycle())).await;
        let mut summary = CycleSummary::default();
        for (processor, result) in self.processors.iter().zip(results) {
            match result {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    warn!("{}: {}", processor.table().name, e);
                    summary.failed_tables.push(processor.table().name.clone());
                }
            }
        }

        self.flush_checkpoints().await;
        summary
    }

    async fn flush_checkpoints(&self) {
        let Some(manager) = &self.checkpoints else {
            return;
        };
        let advanced = self.state.watermarks.lock().await.take_dirty();
        if let Err(e) = flush_watermarks(manager, &advanced).await {
            warn!("Failed to save watermark checkpoints: {:#}", e);
            let mut marks = self.state.watermarks.lock().await;
            for (table, version) in advanced {
                marks.mark_dirty(&table, version);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::HeuristicPolicy;
    use crate::testing::{MemoryChangeLog, RecordingPublisher};
    use crate::watermark::WatermarkCheckpoint;
    use bridge_core::{default_tables, EventType};
    use serde_json::json;

    fn policy() -> SchedulerPolicy {
        SchedulerPolicy {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(4),
            step: Duration::from_secs(1),
            empty_cycles_before_backoff: 2,
            batch_size: 20,
        }
    }

    #[test]
    fn test_backoff_hysteresis() {
        let mut interval = AdaptiveInterval::new(&policy());
        assert_eq!(interval.on_cycle(true), Duration::from_secs(1));
        // One empty cycle after a busy one does not back off.
        assert_eq!(interval.on_cycle(false), Duration::from_secs(1));
        assert_eq!(interval.on_cycle(false), Duration::from_secs(2));
        assert_eq!(interval.on_cycle(false), Duration::from_secs(3));
        assert_eq!(interval.on_cycle(false), Duration::from_secs(4));
        assert_eq!(interval.on_cycle(false), Duration::from_secs(4));
        // Work resets immediately.
        assert_eq!(interval.on_cycle(true), Duration::from_secs(1));
        assert_eq!(interval.on_cycle(false), Duration::from_secs(1));
    }

    #[test]
    fn test_error_forces_max_once() {
        let mut interval = AdaptiveInterval::new(&policy());
        interval.on_cycle(true);
        assert_eq!(interval.on_error(), Duration::from_secs(4));
        assert_eq!(interval.current(), Duration::from_secs(1));
        assert_eq!(interval.on_cycle(true), Duration::from_secs(1));
    }

    fn scheduler(
        log: Arc<MemoryChangeLog>,
        publisher: Arc<RecordingPublisher>,
        checkpoints: Option<CheckpointManager>,
    ) -> (Scheduler, Arc<PipelineState>) {
        let mut heuristics = HeuristicPolicy::default();
        heuristics.scheduler = policy();
        let state = PipelineState::new(heuristics);
        let processors = default_tables()
            .into_iter()
            .map(|t| TableProcessor::new(t, log.clone(), publisher.clone(), state.clone(), "h"))
            .collect();
        (Scheduler::new(processors, state.clone(), checkpoints), state)
    }

    #[tokio::test]
    async fn test_cycle_runs_all_tables_and_flushes_checkpoints() {
        let log = Arc::new(MemoryChangeLog::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let manager = CheckpointManager::in_memory();
        let (mut scheduler, state) = scheduler(log.clone(), publisher.clone(), Some(manager.clone()));
        state
            .initialize_watermarks(log.as_ref(), &default_tables(), None)
            .await
            .unwrap();

        log.insert("ticket_events", 1, json!({"folio": 1, "status": "open"})).await;
        log.insert("shift_events", 1, json!({"shift_id": 2, "status": "open"})).await;
        let summary = scheduler.run_once().await;

        assert!(summary.found_work());
        assert!(!summary.failed());
        assert_eq!(publisher.published().await.len(), 2);
        let saved: WatermarkCheckpoint = manager.load("shift_events").await.unwrap().unwrap();
        assert_eq!(saved.version, 2);
        assert!(manager.load::<WatermarkCheckpoint>("product_events").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_table_does_not_block_others() {
        let log = Arc::new(MemoryChangeLog::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let (mut scheduler, state) = scheduler(log.clone(), publisher.clone(), None);
        state
            .initialize_watermarks(log.as_ref(), &default_tables(), None)
            .await
            .unwrap();

        log.insert("ticket_events", 1, json!({"folio": 1})).await;
        log.insert("product_events", 1, json!({"folio": 1, "product_id": "A"})).await;
        log.fail_fetches("ticket_events", true).await;

        let summary = scheduler.run_once().await;
        assert_eq!(summary.failed_tables, vec!["ticket_events".to_string()]);
        assert_eq!(publisher.published().await.len(), 1);
        assert_eq!(state.watermark("ticket_events").await, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let log = Arc::new(MemoryChangeLog::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let (scheduler, _state) = scheduler(log.clone(), publisher.clone(), None);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));
        tokio::time::sleep(Duration::from_secs(10)).await;
        log.insert("ticket_events", 1, json!({"folio": 1})).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(publisher.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_processors_share_split_state() {
        let log = Arc::new(MemoryChangeLog::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let (mut scheduler, state) = scheduler(log.clone(), publisher.clone(), None);
        for table in default_tables() {
            state.set_watermark(&table.name, 0).await;
        }

        log.insert("ticket_events", 1, json!({"folio": 100, "split_role": "parent", "child_folios": "101,102"}))
            .await;
        scheduler.run_once().await;
        log.insert("payment_events", 1, json!({"folio": 102, "amount": 10, "payment_method": "card"}))
            .await;
        scheduler.run_once().await;

        let published = publisher.published().await;
        let payment = published
            .iter()
            .find(|m| m.event_type() == EventType::Payment)
            .unwrap();
        assert_eq!(payment.body["split"]["key"], "100,101,102");
    }
}
