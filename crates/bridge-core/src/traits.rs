//! Seams to the database and the broker.

use async_trait::async_trait;

use crate::error::{PublishError, SourceError};
use crate::message::OutboundMessage;
use crate::outcome::Outcome;
use crate::record::ChangeRecord;
use crate::table::TableSpec;

/// Watermark-based reader over the relational change log.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Rows of `table` whose change-log version is greater than `after_version`,
    /// ordered by version ascending, at most `limit` of them.
    ///
    /// Only insert/update entries whose row is still pending are returned.
    /// Never advances anything; the caller owns the watermark.
    async fn fetch_pending(
        &self,
        table: &TableSpec,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, SourceError>;

    /// Highest change-log version currently recorded for `table` (0 when empty).
    async fn current_version(&self, table: &TableSpec) -> Result<i64, SourceError>;

    /// Mark the given rows in-progress in one short transaction and return the
    /// ids that were still unclaimed.
    async fn claim(&self, table: &TableSpec, ids: &[i64]) -> Result<Vec<i64>, SourceError>;

    /// Single-row update of the outcome columns.
    async fn write_back(
        &self,
        table: &TableSpec,
        id: i64,
        outcome: &Outcome,
    ) -> Result<(), SourceError>;
}

/// Broker acknowledgement for one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishConfirmation {
    Ack,
    Nack(String),
}

/// Confirm-tracked publisher.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish and wait for the broker's confirmation.
    ///
    /// Returns `Err` only when the broker cannot be reached (or the message
    /// cannot be encoded); a broker nack is `Ok(PublishConfirmation::Nack)`.
    async fn publish(&self, message: &OutboundMessage) -> Result<PublishConfirmation, PublishError>;
}
