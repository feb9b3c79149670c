use async_trait::async_trait;
use bridge_core::{ChangeRecord, ChangeSource, Operation, Outcome, SourceError, TableSpec};
use chrono::{DateTime, Utc};
use deadpool_postgres::{Client, Pool};
use serde_json::Value;
use tracing::{debug, warn};

use crate::change_log::CURRENT_VERSION_SQL;
use crate::registry::QueryRegistry;

/// [`ChangeSource`] over `pos_change_log`, joined against the live rows.
pub struct PostgresChangeSource {
    pool: Pool,
    registry: QueryRegistry,
}

impl PostgresChangeSource {
    pub fn new(pool: Pool, registry: QueryRegistry) -> Self {
        Self { pool, registry }
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Validate the registry against the live schema.
    pub async fn validate(&self) -> Result<(), SourceError> {
        let client = self.client().await?;
        self.registry.validate(&client).await
    }

    async fn client(&self) -> Result<Client, SourceError> {
        self.pool
            .get()
            .await
            .map_err(|e| SourceError::Pool(e.to_string()))
    }
}

#[async_trait]
impl ChangeSource for PostgresChangeSource {
    async fn fetch_pending(
        &self,
        table: &TableSpec,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, SourceError> {
        let queries = self.registry.get(&table.name)?;
        let client = self.client().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let statement = client
            .prepare_cached(&queries.fetch)
            .await
            .map_err(|e| SourceError::query(&table.name, e))?;
        let rows = client
            .query(&statement, &[&table.name, &after_version, &limit])
            .await
            .map_err(|e| SourceError::query(&table.name, e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let version: i64 = row.get(0);
            let operation: String = row.get(1);
            let id: i64 = row.get(2);
            let payload: Value = row.get(3);
            let processed: Option<bool> = row.get(4);
            let response: Option<String> = row.get(5);
            let updated_at: Option<DateTime<Utc>> = row.get(6);
            let changed_at: DateTime<Utc> = row.get(7);

            let operation: Operation = match operation.parse() {
                Ok(op) => op,
                Err(e) => {
                    warn!("Skipping change log entry {} for {}: {}", version, table.name, e);
                    continue;
                }
            };
            let Value::Object(payload) = payload else {
                warn!(
                    "Skipping change log entry {} for {}: row is not a JSON object",
                    version, table.name
                );
                continue;
            };

            let mut record = ChangeRecord::new(&table.name, id, version, operation, payload);
            record.processed = processed;
            record.response = response;
            record.updated_at = updated_at;
            record.changed_at = Some(changed_at);
            records.push(record);
        }

        debug!(
            "Fetched {} pending change(s) from {} after version {}",
            records.len(),
            table.name,
            after_version
        );
        Ok(records)
    }

    async fn current_version(&self, table: &TableSpec) -> Result<i64, SourceError> {
        let client = self.client().await?;
        let row = client
            .query_one(CURRENT_VERSION_SQL, &[&table.name])
            .await
            .map_err(|e| SourceError::query(&table.name, e))?;
        Ok(row.get(0))
    }

    async fn claim(&self, table: &TableSpec, ids: &[i64]) -> Result<Vec<i64>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let queries = self.registry.get(&table.name)?;
        let claim_error = |e: tokio_postgres::Error| SourceError::Claim {
            table: table.name.clone(),
            message: e.to_string(),
        };

        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(claim_error)?;
        let ids: Vec<i64> = ids.to_vec();
        let rows = tx.query(&queries.claim, &[&ids]).await.map_err(claim_error)?;
        tx.commit().await.map_err(claim_error)?;

        let claimed: Vec<i64> = rows.iter().map(|row| row.get(0)).collect();
        debug!(
            "Claimed {}/{} row(s) in {}",
            claimed.len(),
            ids.len(),
            table.name
        );
        Ok(claimed)
    }

    async fn write_back(
        &self,
        table: &TableSpec,
        id: i64,
        outcome: &Outcome,
    ) -> Result<(), SourceError> {
        let queries = self.registry.get(&table.name)?;
        let write_error = |message: String| SourceError::WriteBack {
            table: table.name.clone(),
            id,
            message,
        };

        let client = self.client().await.map_err(|e| write_error(e.to_string()))?;
        let updated = client
            .execute(
                &queries.write_back,
                &[&id, &outcome.processed, &outcome.response],
            )
            .await
            .map_err(|e| write_error(e.to_string()))?;
        if updated == 0 {
            return Err(write_error("row no longer exists".to_string()));
        }
        Ok(())
    }
}
