//! In-memory change source and publisher.
//!
//! `MemoryChangeLog` behaves like the PostgreSQL change source: one global
//! version sequence, the same pending filter, claim-then-release semantics and
//! recorded write-backs. Changes are stamped from the runtime clock, so they
//! follow `tokio::time::pause`, unless a fixed change time is set.
//! `RecordingPublisher` keeps every published message and can be told to nack
//! or to behave as if the broker were down.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use bridge_core::{
    ChangeRecord, ChangeSource, EventPublisher, Operation, OutboundMessage, Outcome,
    PublishConfirmation, PublishError, SourceError, TableSpec, CLAIM_MARKER,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct LogEntry {
    version: i64,
    table: String,
    row_id: i64,
    operation: Operation,
    changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Row {
    payload: Map<String, Value>,
    processed: Option<bool>,
    response: Option<String>,
}

#[derive(Debug, Default)]
struct LogInner {
    next_version: i64,
    entries: Vec<LogEntry>,
    rows: BTreeMap<(String, i64), Row>,
    write_backs: Vec<(String, i64, Outcome)>,
    failing_tables: HashSet<String>,
    failing_write_backs: HashSet<(String, i64)>,
    flaky_write_backs: HashSet<(String, i64)>,
    fixed_change_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct MemoryChangeLog {
    inner: Mutex<LogInner>,
    epoch: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl Default for MemoryChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChangeLog {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// The first appended change gets version `last_version + 1`.
    pub fn starting_at(last_version: i64) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                next_version: last_version + 1,
                ..Default::default()
            }),
            epoch: Utc::now(),
            started: tokio::time::Instant::now(),
        }
    }

    /// Stamp every later change with `at` instead of the runtime clock.
    pub async fn set_change_time(&self, at: DateTime<Utc>) {
        self.inner.lock().await.fixed_change_time = Some(at);
    }

    pub async fn insert(&self, table: &str, id: i64, payload: Value) -> i64 {
        self.append(table, id, Operation::Insert, payload).await
    }

    pub async fn update(&self, table: &str, id: i64, payload: Value) -> i64 {
        self.append(table, id, Operation::Update, payload).await
    }

    /// Record a change and replace the live row with `payload`. Deletes keep
    /// the row so the change can be joined, as a soft-deleting schema would.
    pub async fn append(&self, table: &str, id: i64, operation: Operation, payload: Value) -> i64 {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap_or_default();
        let mut inner = self.inner.lock().await;
        let changed_at = inner.fixed_change_time.unwrap_or(self.epoch + elapsed);
        let version = inner.next_version;
        inner.next_version += 1;
        inner.entries.push(LogEntry {
            version,
            table: table.to_string(),
            row_id: id,
            operation,
            changed_at,
        });
        inner.rows.insert(
            (table.to_string(), id),
            Row {
                payload,
                processed: None,
                response: None,
            },
        );
        version
    }

    /// Overwrite a row's outcome columns without logging a change.
    pub async fn set_outcome(&self, table: &str, id: i64, processed: Option<bool>, response: Option<&str>) {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner.rows.get_mut(&(table.to_string(), id)) {
            row.processed = processed;
            row.response = response.map(str::to_string);
        }
    }

    /// Current outcome columns of a row.
    pub async fn outcome(&self, table: &str, id: i64) -> Option<(Option<bool>, Option<String>)> {
        let inner = self.inner.lock().await;
        inner
            .rows
            .get(&(table.to_string(), id))
            .map(|row| (row.processed, row.response.clone()))
    }

    pub async fn write_backs(&self) -> Vec<(String, i64, Outcome)> {
        self.inner.lock().await.write_backs.clone()
    }

    /// Make every scan of `table` fail until cleared.
    pub async fn fail_fetches(&self, table: &str, failing: bool) {
        let mut inner = self.inner.lock().await;
        if failing {
            inner.failing_tables.insert(table.to_string());
        } else {
            inner.failing_tables.remove(table);
        }
    }

    pub async fn fail_write_back(&self, table: &str, id: i64) {
        self.inner
            .lock()
            .await
            .failing_write_backs
            .insert((table.to_string(), id));
    }

    /// Fail only the next write-back of a row.
    pub async fn fail_write_back_once(&self, table: &str, id: i64) {
        self.inner
            .lock()
            .await
            .flaky_write_backs
            .insert((table.to_string(), id));
    }
}

#[async_trait]
impl ChangeSource for MemoryChangeLog {
    async fn fetch_pending(
        &self,
        table: &TableSpec,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, SourceError> {
        let inner = self.inner.lock().await;
        if inner.failing_tables.contains(&table.name) {
            return Err(SourceError::query(&table.name, "connection reset"));
        }

        let mut entries: Vec<&LogEntry> = inner
            .entries
            .iter()
            .filter(|e| e.table == table.name && e.version > after_version)
            .filter(|e| e.operation != Operation::Delete)
            .collect();
        entries.sort_by_key(|e| e.version);

        let records = entries
            .into_iter()
            .filter_map(|e| {
                let row = inner.rows.get(&(e.table.clone(), e.row_id))?;
                let mut record = ChangeRecord::new(
                    &e.table,
                    e.row_id,
                    e.version,
                    e.operation,
                    row.payload.clone(),
                );
                record.processed = row.processed;
                record.response = row.response.clone();
                record.changed_at = Some(e.changed_at);
                Some(record)
            })
            .filter(ChangeRecord::is_pending)
            .take(limit)
            .collect();
        Ok(records)
    }

    async fn current_version(&self, table: &TableSpec) -> Result<i64, SourceError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.table == table.name)
            .map(|e| e.version)
            .max()
            .unwrap_or(0))
    }

    async fn claim(&self, table: &TableSpec, ids: &[i64]) -> Result<Vec<i64>, SourceError> {
        let mut inner = self.inner.lock().await;
        let mut claimed = Vec::new();
        for id in ids {
            if let Some(row) = inner.rows.get_mut(&(table.name.clone(), *id)) {
                if row.response.is_none() {
                    row.response = Some(CLAIM_MARKER.to_string());
                    claimed.push(*id);
                }
            }
        }
        Ok(claimed)
    }

    async fn write_back(
        &self,
        table: &TableSpec,
        id: i64,
        outcome: &Outcome,
    ) -> Result<(), SourceError> {
        let mut inner = self.inner.lock().await;
        let key = (table.name.clone(), id);
        if inner.failing_write_backs.contains(&key) || inner.flaky_write_backs.remove(&key) {
            return Err(SourceError::WriteBack {
                table: table.name.clone(),
                id,
                message: "lock timeout".to_string(),
            });
        }
        let row = inner
            .rows
            .get_mut(&(table.name.clone(), id))
            .ok_or_else(|| SourceError::WriteBack {
                table: table.name.clone(),
                id,
                message: "row not found".to_string(),
            })?;
        row.processed = Some(outcome.processed);
        row.response = Some(outcome.response.clone());
        inner
            .write_backs
            .push((table.name.clone(), id, outcome.clone()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PublisherInner {
    published: Vec<OutboundMessage>,
    nack_next: Option<String>,
    unavailable: bool,
}

#[derive(Debug, Default)]
pub struct RecordingPublisher {
    inner: Mutex<PublisherInner>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.inner.lock().await.published.clone()
    }

    /// The next publish is nacked with `reason`.
    pub async fn nack_next(&self, reason: &str) {
        self.inner.lock().await.nack_next = Some(reason.to_string());
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.unavailable = unavailable;
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<PublishConfirmation, PublishError> {
        let mut inner = self.inner.lock().await;
        if inner.unavailable {
            return Err(PublishError::Unavailable("connection refused".to_string()));
        }
        message.to_bytes()?;
        if let Some(reason) = inner.nack_next.take() {
            return Ok(PublishConfirmation::Nack(reason));
        }
        inner.published.push(message.clone());
        Ok(PublishConfirmation::Ack)
    }
}
