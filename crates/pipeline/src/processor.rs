//! One processor per tracked table.
//!
//! A cycle scans the change log past the table's watermark, optionally claims
//! the rows, feeds the whole batch into the closeout activity window and then
//! walks the rows in version order:
//!
//! ```text
//! PENDING -> EVALUATED -> SKIPPED-NOISE | SKIPPED-DUPLICATE | PUBLISHED
//!                         | PUBLISH-FAILED | PROCESSING-ERROR
//! ```
//!
//! Each terminal state is written back to the row on its own, and a failure on
//! one row never stops the batch. Closeout windows are measured on each row's
//! change-log time, so a backlog read in one batch is not mistaken for a burst.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use bridge_core::{
    ChangeRecord, ChangeSource, Disposition, EventPublisher, Outcome, PublishConfirmation,
    SourceError, TableSpec, CLAIM_MARKER,
};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::dedup::fingerprint;
use crate::error::ProcessError;
use crate::message::{build_message, SplitContext};
use crate::shift::Verdict;
use crate::state::{self, PipelineState};

/// What one cycle of one table did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub table: String,
    pub fetched: usize,
    /// Rows left to another instance by the claim step.
    pub not_claimed: usize,
    pub published: usize,
    pub publish_failed: usize,
    pub skipped_noise: usize,
    pub skipped_duplicate: usize,
    pub errors: usize,
    pub write_back_failures: usize,
    pub watermark: Option<i64>,
}

impl CycleReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    pub fn found_work(&self) -> bool {
        self.fetched > 0
    }

    fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::SkippedNoise(_) => self.skipped_noise += 1,
            Disposition::SkippedDuplicate => self.skipped_duplicate += 1,
            Disposition::Published => self.published += 1,
            Disposition::PublishFailed(_) => self.publish_failed += 1,
            Disposition::ProcessingError(_) => self.errors += 1,
        }
    }
}

pub struct TableProcessor {
    table: TableSpec,
    source: Arc<dyn ChangeSource>,
    publisher: Arc<dyn EventPublisher>,
    state: Arc<PipelineState>,
    source_host: String,
}

impl TableProcessor {
    pub fn new(
        table: TableSpec,
        source: Arc<dyn ChangeSource>,
        publisher: Arc<dyn EventPublisher>,
        state: Arc<PipelineState>,
        source_host: impl Into<String>,
    ) -> Self {
        Self {
            table,
            source,
            publisher,
            state,
            source_host: source_host.into(),
        }
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    /// Run one scan-and-publish cycle.
    ///
    /// Returns `Err` only for cycle-level failures (scan or claim); the
    /// watermark is left where it was and the range is retried next cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, ProcessError> {
        let table = &self.table;
        let mut report = CycleReport::new(&table.name);

        let after = match self.state.watermark(&table.name).await {
            Some(version) => version,
            None => {
                let current = self
                    .source
                    .current_version(table)
                    .await
                    .map_err(ProcessError::Fetch)?;
                self.state.set_watermark(&table.name, current).await;
                current
            }
        };

        let batch_size = self.state.policy().scheduler.batch_size;
        let mut rows = self
            .source
            .fetch_pending(table, after, batch_size)
            .await
            .map_err(ProcessError::Fetch)?;
        report.fetched = rows.len();
        let Some(max_version) = rows.iter().map(|r| r.version).max() else {
            report.watermark = Some(after);
            return Ok(report);
        };
        rows.sort_by_key(|r| r.version);

        // Every log entry for a row joins the same live row; keep the latest.
        let mut seen = HashSet::new();
        rows.reverse();
        rows.retain(|r| seen.insert(r.id));
        rows.reverse();

        if table.claim_rows {
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            let claimed = self
                .source
                .claim(table, &ids)
                .await
                .map_err(ProcessError::Claim)?;
            rows.retain(|r| claimed.contains(&r.id));
            report.not_claimed = ids.len() - rows.len();
            if report.not_claimed > 0 {
                debug!(
                    "{}: {} row(s) already claimed elsewhere",
                    table.name, report.not_claimed
                );
            }
        }

        let now = state::now();
        let read_at = Utc::now();
        {
            let mut closures = self.state.closures.lock().await;
            for row in &rows {
                closures.observe(table, row, row.changed_at.unwrap_or(read_at), now);
            }
        }

        for row in &rows {
            let changed_at = row.changed_at.unwrap_or(read_at);
            let disposition = match self.evaluate_and_publish(row, now, changed_at).await {
                Ok(disposition) => disposition,
                Err(e) => {
                    warn!("{}#{} v{}: {}", table.name, row.id, row.version, e);
                    Disposition::ProcessingError(e.to_string())
                }
            };
            debug!(
                "{}#{} v{} -> {}",
                table.name, row.id, row.version, disposition
            );
            report.record(&disposition);

            if let Err(e) = self.write_back(row.id, &disposition.outcome()).await {
                if table.claim_rows {
                    error!(
                        "Failed to write back {} for {}#{}: {}; the row keeps its '{}' marker \
                         until its response column is cleared",
                        disposition, table.name, row.id, e, CLAIM_MARKER
                    );
                } else {
                    error!(
                        "Failed to write back {} for {}#{}: {}",
                        disposition, table.name, row.id, e
                    );
                }
                report.write_back_failures += 1;
            }
        }

        self.state
            .watermarks
            .lock()
            .await
            .advance(&table.name, max_version);
        report.watermark = Some(max_version);

        info!(
            "{}: fetched={} published={} failed={} noise={} duplicate={} errors={} watermark={}",
            table.name,
            report.fetched,
            report.published,
            report.publish_failed,
            report.skipped_noise,
            report.skipped_duplicate,
            report.errors,
            max_version
        );
        Ok(report)
    }

    /// Store an outcome, retrying once before giving up.
    async fn write_back(&self, id: i64, outcome: &Outcome) -> Result<(), SourceError> {
        match self.source.write_back(&self.table, id, outcome).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Write-back for {}#{} failed, retrying: {}", self.table.name, id, e);
                self.source.write_back(&self.table, id, outcome).await
            }
        }
    }

    /// Decide the terminal state of one row, publishing it if it survives.
    async fn evaluate_and_publish(
        &self,
        row: &ChangeRecord,
        now: Instant,
        changed_at: DateTime<Utc>,
    ) -> Result<Disposition, ProcessError> {
        let table = &self.table;
        let classification = row.classification();

        let split_key = {
            let mut splits = self.state.splits.lock().await;
            match row.split() {
                Some(declaration) => Some(splits.register(&declaration, now)),
                None => row
                    .folio()
                    .and_then(|folio| splits.correlate(&folio, now)),
            }
        };

        let verdict = self
            .state
            .closures
            .lock()
            .await
            .evaluate(table, row, split_key.is_some(), changed_at);
        if let Verdict::Noise(reason) = verdict {
            return Ok(Disposition::SkippedNoise(reason));
        }

        let key = fingerprint(table, row, split_key.as_deref());
        if self.state.seen_before(&table.name, &key, now).await {
            if !classification.is_delete() {
                return Ok(Disposition::SkippedDuplicate);
            }
            debug!("{}#{}: republishing delete despite dedup hit", table.name, row.id);
        }

        let split = match split_key {
            Some(key) => {
                let reallocated = match row.product_id() {
                    Some(product) => !self.state.splits.lock().await.mark_product(&key, &product),
                    None => false,
                };
                Some(SplitContext { key, reallocated })
            }
            None => None,
        };

        let message = build_message(table, row, split.as_ref(), &self.source_host)?;
        let disposition = match self.publisher.publish(&message).await {
            Ok(PublishConfirmation::Ack) => Disposition::Published,
            Ok(PublishConfirmation::Nack(reason)) => {
                warn!(
                    "Broker rejected {} for {}#{}: {}",
                    message.message_id(),
                    table.name,
                    row.id,
                    reason
                );
                Disposition::PublishFailed(format!("broker nack: {reason}"))
            }
            Err(e) => {
                warn!("Publish of {}#{} failed: {}", table.name, row.id, e);
                Disposition::PublishFailed(e.to_string())
            }
        };
        Ok(disposition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::HeuristicPolicy;
    use crate::testing::{MemoryChangeLog, RecordingPublisher};
    use bridge_core::{EventType, Operation};
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        log: Arc<MemoryChangeLog>,
        publisher: Arc<RecordingPublisher>,
        state: Arc<PipelineState>,
    }

    impl Harness {
        fn new(log: MemoryChangeLog) -> Self {
            Self {
                log: Arc::new(log),
                publisher: Arc::new(RecordingPublisher::new()),
                state: PipelineState::new(HeuristicPolicy::default()),
            }
        }

        fn processor(&self, event_type: EventType) -> TableProcessor {
            let name = match event_type {
                EventType::Ticket => "ticket_events",
                EventType::Product => "product_events",
                EventType::Payment => "payment_events",
                EventType::Shift => "shift_events",
            };
            TableProcessor::new(
                TableSpec::new(name, event_type),
                self.log.clone(),
                self.publisher.clone(),
                self.state.clone(),
                "pos-host",
            )
        }

        async fn statuses(&self) -> Vec<String> {
            self.publisher
                .published()
                .await
                .iter()
                .map(|m| m.body["status"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_end_to_end_ticket_flow() {
        let h = Harness::new(MemoryChangeLog::starting_at(100));
        h.state.set_watermark("ticket_events", 100).await;
        let v1 = h
            .log
            .insert("ticket_events", 1, json!({"Folio": 55, "EventType": "OPEN"}))
            .await;
        let v2 = h
            .log
            .update("ticket_events", 2, json!({"Folio": 55, "EventType": "PAID", "Total": 250.00}))
            .await;
        assert_eq!((v1, v2), (101, 102));

        let report = h.processor(EventType::Ticket).run_cycle().await.unwrap();
        assert_eq!(report.published, 2);
        assert_eq!(report.watermark, Some(102));
        assert_eq!(h.state.watermark("ticket_events").await, Some(102));

        let published = h.publisher.published().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].body["version"], 101);
        assert_eq!(published[1].body["status"], "PAID");
        assert_eq!(published[1].body["total"], "250.00");

        for id in [1, 2] {
            let (processed, response) = h.log.outcome("ticket_events", id).await.unwrap();
            assert_eq!(processed, Some(true));
            assert_eq!(response.as_deref(), Some("published"));
        }
    }

    #[tokio::test]
    async fn test_repeated_row_in_batch_published_once() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("ticket_events", 0).await;
        h.log
            .insert("ticket_events", 1, json!({"folio": 7, "status": "open"}))
            .await;
        h.log
            .update("ticket_events", 1, json!({"folio": 7, "status": "paid"}))
            .await;

        let report = h.processor(EventType::Ticket).run_cycle().await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.published, 1);
        assert_eq!(report.watermark, Some(2));
        assert_eq!(h.statuses().await, vec!["PAID"]);
    }

    #[tokio::test]
    async fn test_rows_published_in_version_order() {
        let h = Harness::new(MemoryChangeLog::starting_at(100));
        h.state.set_watermark("ticket_events", 100).await;
        for (id, status) in [(1, "open"), (2, "update"), (3, "closed")] {
            h.log
                .insert("ticket_events", id, json!({"folio": 9, "status": status}))
                .await;
        }

        h.processor(EventType::Ticket).run_cycle().await.unwrap();
        let versions: Vec<i64> = h
            .publisher
            .published()
            .await
            .iter()
            .map(|m| m.body["version"].as_i64().unwrap())
            .collect();
        assert_eq!(versions, vec![101, 102, 103]);
    }

    #[tokio::test]
    async fn test_replay_within_ttl_publishes_once() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("ticket_events", 0).await;
        h.log
            .insert("ticket_events", 1, json!({"folio": 5, "status": "open"}))
            .await;
        let processor = h.processor(EventType::Ticket);
        processor.run_cycle().await.unwrap();

        // The writer re-emits the same logical event for the same row.
        h.log
            .update("ticket_events", 1, json!({"folio": 5, "status": "open"}))
            .await;
        let report = processor.run_cycle().await.unwrap();

        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(h.publisher.published().await.len(), 1);
        let (processed, response) = h.log.outcome("ticket_events", 1).await.unwrap();
        assert_eq!(processed, Some(true));
        assert_eq!(response.as_deref(), Some("duplicate"));
    }

    #[tokio::test]
    async fn test_replayed_delete_is_republished() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("product_events", 0).await;
        let processor = h.processor(EventType::Product);
        let payload = json!({"folio": 5, "product_id": "A", "status": "deleted"});

        h.log.insert("product_events", 1, payload.clone()).await;
        processor.run_cycle().await.unwrap();
        h.log.update("product_events", 1, payload).await;
        processor.run_cycle().await.unwrap();

        assert_eq!(h.publisher.published().await.len(), 2);
    }

    #[tokio::test]
    async fn test_closeout_burst_suppressed() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("ticket_events", 0).await;
        for id in 1..=9 {
            h.log
                .insert("ticket_events", id, json!({"folio": 700 + id, "status": "deleted"}))
                .await;
        }

        let report = h.processor(EventType::Ticket).run_cycle().await.unwrap();
        assert_eq!(report.skipped_noise, 9);
        assert!(h.publisher.published().await.is_empty());
        let (processed, response) = h.log.outcome("ticket_events", 4).await.unwrap();
        assert_eq!(processed, Some(true));
        assert!(response.unwrap().starts_with("skipped: closeout burst"));
    }

    #[tokio::test]
    async fn test_backlog_of_cancellations_is_published() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("ticket_events", 0).await;
        // Cancelled over an afternoon, read in one cycle after a restart.
        let afternoon = Utc.with_ymd_and_hms(2026, 3, 14, 13, 0, 0).unwrap();
        for i in 0..6 {
            h.log
                .set_change_time(afternoon + chrono::Duration::minutes(45 * i))
                .await;
            h.log
                .insert("ticket_events", i + 1, json!({"folio": 900 + i, "status": "cancelled"}))
                .await;
        }

        let report = h.processor(EventType::Ticket).run_cycle().await.unwrap();
        assert_eq!(report.fetched, 6);
        assert_eq!(report.skipped_noise, 0);
        assert_eq!(report.published, 6);
    }

    #[tokio::test]
    async fn test_burst_logged_at_once_is_noise_even_when_read_late() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("ticket_events", 0).await;
        h.log
            .set_change_time(Utc.with_ymd_and_hms(2026, 3, 14, 23, 0, 0).unwrap())
            .await;
        for id in 1..=6 {
            h.log
                .insert("ticket_events", id, json!({"folio": 900 + id, "status": "cancelled"}))
                .await;
        }

        let report = h.processor(EventType::Ticket).run_cycle().await.unwrap();
        assert_eq!(report.skipped_noise, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closeout_spread_across_cycles() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("ticket_events", 0).await;
        let processor = h.processor(EventType::Ticket);

        // Nine bills cancelled over 30 s, one per poll.
        let mut noise = 0;
        for id in 1..=9 {
            h.log
                .insert("ticket_events", id, json!({"folio": 800 + id, "status": "cancelled"}))
                .await;
            noise += processor.run_cycle().await.unwrap().skipped_noise;
            tokio::time::advance(Duration::from_millis(3300)).await;
        }

        // Until the fourth bill no cycle has seen enough to call it a burst.
        assert_eq!(h.publisher.published().await.len(), 3);
        assert_eq!(noise, 6);
        let (_, response) = h.log.outcome("ticket_events", 9).await.unwrap();
        assert_eq!(
            response.as_deref(),
            Some("skipped: closeout burst (distinct-bill deletes)")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_closeout_after_shift_close_spread_across_cycles() {
        let h = Harness::new(MemoryChangeLog::new());
        for table in ["shift_events", "ticket_events"] {
            h.state.set_watermark(table, 0).await;
        }
        h.log
            .insert("shift_events", 1, json!({"status": "closed"}))
            .await;
        h.processor(EventType::Shift).run_cycle().await.unwrap();

        let processor = h.processor(EventType::Ticket);
        let mut noise = 0;
        for id in 1..=9 {
            tokio::time::advance(Duration::from_millis(3300)).await;
            h.log
                .insert("ticket_events", id, json!({"folio": 800 + id, "status": "cancelled"}))
                .await;
            noise += processor.run_cycle().await.unwrap().skipped_noise;
        }

        assert_eq!(noise, 9);
        assert_eq!(h.statuses().await, vec!["CLOSED"]);
    }

    #[tokio::test]
    async fn test_single_item_removals_published() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("product_events", 0).await;
        h.log
            .insert("product_events", 1, json!({"folio": 55, "product_id": "A", "status": "deleted"}))
            .await;
        h.log
            .insert("product_events", 2, json!({"folio": 55, "product_id": "B", "status": "deleted"}))
            .await;

        let report = h.processor(EventType::Product).run_cycle().await.unwrap();
        assert_eq!(report.published, 2);
        assert_eq!(report.skipped_noise, 0);
    }

    #[tokio::test]
    async fn test_shift_closure_suppresses_deletes_across_tables() {
        let h = Harness::new(MemoryChangeLog::new());
        for table in ["shift_events", "product_events"] {
            h.state.set_watermark(table, 0).await;
        }
        h.log
            .insert("shift_events", 1, json!({"shift_id": 8, "status": "closed"}))
            .await;
        h.log
            .insert("product_events", 1, json!({"folio": 3, "shift_id": 8, "product_id": "A", "status": "deleted"}))
            .await;

        h.processor(EventType::Shift).run_cycle().await.unwrap();
        let report = h.processor(EventType::Product).run_cycle().await.unwrap();

        assert_eq!(report.skipped_noise, 1);
        let (_, response) = h.log.outcome("product_events", 1).await.unwrap();
        assert_eq!(response.as_deref(), Some("skipped: shift 8 closed"));
        // Only the shift closure itself went out.
        assert_eq!(h.statuses().await, vec!["CLOSED"]);
    }

    #[tokio::test]
    async fn test_split_lets_deletes_through_across_cycles() {
        let h = Harness::new(MemoryChangeLog::new());
        for table in ["ticket_events", "product_events"] {
            h.state.set_watermark(table, 0).await;
        }
        let tickets = h.processor(EventType::Ticket);
        let products = h.processor(EventType::Product);

        h.log
            .insert("ticket_events", 1, json!({"folio": 100, "status": "split", "child_folios": [101, 102]}))
            .await;
        tickets.run_cycle().await.unwrap();

        // A shift closed without an id: one burst signal for every delete.
        h.log
            .insert("shift_events", 1, json!({"status": "closed"}))
            .await;
        h.state.set_watermark("shift_events", 0).await;
        h.processor(EventType::Shift).run_cycle().await.unwrap();

        h.log
            .insert("ticket_events", 2, json!({"folio": 101, "parent_folio": 100, "status": "open"}))
            .await;
        h.log
            .insert("ticket_events", 3, json!({"folio": 102, "status": "cancelled"}))
            .await;
        h.log
            .insert("product_events", 1, json!({"folio": 101, "product_id": "A", "status": "deleted"}))
            .await;
        let ticket_report = tickets.run_cycle().await.unwrap();
        products.run_cycle().await.unwrap();

        assert_eq!(ticket_report.skipped_noise, 0);
        let published = h.publisher.published().await;
        let keys: Vec<&str> = published
            .iter()
            .filter_map(|m| m.body.get("split"))
            .filter_map(|s| s["key"].as_str())
            .collect();
        assert_eq!(keys, vec!["100,101,102"; 4]);
    }

    #[tokio::test]
    async fn test_ticket_delete_after_anonymous_shift_close_is_noise() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("shift_events", 0).await;
        h.state.set_watermark("ticket_events", 0).await;
        h.log
            .insert("shift_events", 1, json!({"status": "closed"}))
            .await;
        h.processor(EventType::Shift).run_cycle().await.unwrap();

        h.log
            .insert("ticket_events", 1, json!({"folio": 300, "status": "cancelled"}))
            .await;
        let report = h.processor(EventType::Ticket).run_cycle().await.unwrap();
        assert_eq!(report.skipped_noise, 1);
    }

    #[tokio::test]
    async fn test_write_back_exclusivity() {
        let h = Harness::new(MemoryChangeLog::starting_at(100));
        h.state.set_watermark("ticket_events", 100).await;
        h.log
            .insert("ticket_events", 1, json!({"folio": 1, "status": "open"}))
            .await;
        h.log
            .insert("ticket_events", 2, json!({"folio": 2, "status": "open"}))
            .await;
        h.log
            .set_outcome("ticket_events", 1, None, Some("handled elsewhere"))
            .await;

        let report = h.processor(EventType::Ticket).run_cycle().await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(h.publisher.published().await[0].body["id"], 2);
        assert_eq!(report.watermark, Some(102));
    }

    #[tokio::test]
    async fn test_publish_failures_are_terminal_and_isolated() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("ticket_events", 0).await;
        for id in 1..=3 {
            h.log
                .insert("ticket_events", id, json!({"folio": id, "status": "open"}))
                .await;
        }
        h.publisher.nack_next("queue full").await;

        let report = h.processor(EventType::Ticket).run_cycle().await.unwrap();
        assert_eq!(report.publish_failed, 1);
        assert_eq!(report.published, 2);
        let (processed, response) = h.log.outcome("ticket_events", 1).await.unwrap();
        assert_eq!(processed, Some(false));
        assert_eq!(response.as_deref(), Some("publish failed: broker nack: queue full"));

        h.publisher.set_unavailable(true).await;
        h.log
            .insert("ticket_events", 4, json!({"folio": 4, "status": "open"}))
            .await;
        let report = h.processor(EventType::Ticket).run_cycle().await.unwrap();
        assert_eq!(report.publish_failed, 1);
        let (_, response) = h.log.outcome("ticket_events", 4).await.unwrap();
        assert!(response.unwrap().starts_with("publish failed: Broker unavailable"));
    }

    #[tokio::test]
    async fn test_bad_row_does_not_abort_batch() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("payment_events", 0).await;
        h.log
            .insert("payment_events", 1, json!({"folio": 1, "amount": "n/a"}))
            .await;
        h.log
            .insert("payment_events", 2, json!({"folio": 2, "amount": "12.5", "payment_method": "cash"}))
            .await;
        h.log.fail_write_back("payment_events", 2).await;
        h.log
            .insert("payment_events", 3, json!({"folio": 3, "amount": "1"}))
            .await;

        let report = h.processor(EventType::Payment).run_cycle().await.unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.published, 2);
        assert_eq!(report.write_back_failures, 1);
        let (processed, response) = h.log.outcome("payment_events", 1).await.unwrap();
        assert_eq!(processed, Some(false));
        assert!(response.unwrap().starts_with("error: Row payment_events#1"));
        let (_, response) = h.log.outcome("payment_events", 2).await.unwrap();
        assert_eq!(response.as_deref(), Some(CLAIM_MARKER));
    }

    #[tokio::test]
    async fn test_write_back_retried_once() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("payment_events", 0).await;
        h.log
            .insert("payment_events", 1, json!({"folio": 1, "amount": "12.5"}))
            .await;
        h.log.fail_write_back_once("payment_events", 1).await;

        let report = h.processor(EventType::Payment).run_cycle().await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(report.write_back_failures, 0);
        let (processed, response) = h.log.outcome("payment_events", 1).await.unwrap();
        assert_eq!(processed, Some(true));
        assert_eq!(response.as_deref(), Some("published"));
    }

    #[tokio::test]
    async fn test_scan_failure_keeps_watermark() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("ticket_events", 0).await;
        h.log
            .insert("ticket_events", 1, json!({"folio": 1, "status": "open"}))
            .await;
        h.log.fail_fetches("ticket_events", true).await;

        let err = h.processor(EventType::Ticket).run_cycle().await.unwrap_err();
        assert!(err.is_cycle_error());
        assert_eq!(h.state.watermark("ticket_events").await, Some(0));

        h.log.fail_fetches("ticket_events", false).await;
        let report = h.processor(EventType::Ticket).run_cycle().await.unwrap();
        assert_eq!(report.published, 1);
    }

    #[tokio::test]
    async fn test_claimed_rows_are_skipped_by_second_instance() {
        let log = Arc::new(MemoryChangeLog::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let payments = TableSpec::new("payment_events", EventType::Payment);
        log.append("payment_events", 1, Operation::Insert, json!({"folio": 1, "amount": 5}))
            .await;

        // Another instance claimed the row between our scan and claim.
        let rows = log.fetch_pending(&payments, 0, 20).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(log.claim(&payments, &[1]).await.unwrap(), vec![1]);

        let state = PipelineState::new(HeuristicPolicy::default());
        state.set_watermark("payment_events", 0).await;
        let processor = TableProcessor::new(payments.clone(), log.clone(), publisher.clone(), state, "h");
        let report = processor.run_cycle().await.unwrap();
        assert_eq!(report.fetched, 0);
        assert!(publisher.published().await.is_empty());
        assert!(log.claim(&payments, &[1]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_marker_replaced_by_outcome() {
        let h = Harness::new(MemoryChangeLog::new());
        h.state.set_watermark("payment_events", 0).await;
        h.log
            .insert("payment_events", 1, json!({"folio": 1, "amount": 5}))
            .await;

        let report = h.processor(EventType::Payment).run_cycle().await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(report.not_claimed, 0);
        let (_, response) = h.log.outcome("payment_events", 1).await.unwrap();
        assert_eq!(response.as_deref(), Some("published"));
    }

    #[tokio::test]
    async fn test_missing_watermark_starts_at_current_version() {
        let h = Harness::new(MemoryChangeLog::new());
        h.log
            .insert("ticket_events", 1, json!({"folio": 1, "status": "open"}))
            .await;

        let report = h.processor(EventType::Ticket).run_cycle().await.unwrap();
        assert_eq!(report.fetched, 0);
        assert_eq!(h.state.watermark("ticket_events").await, Some(1));
    }
}
