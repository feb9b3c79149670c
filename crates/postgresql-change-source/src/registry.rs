//! Per-table query templates.
//!
//! Table names cannot be bound as parameters, so every statement that names a
//! tracked table is rendered here, once, from an identifier that has already
//! passed [`bridge_core::validate_identifier`]. Nothing else in the crate
//! formats SQL with a table name.

use std::collections::BTreeMap;

use bridge_core::{SourceError, TableSpec, CLAIM_MARKER};
use deadpool_postgres::Client;
use tracing::{debug, info};

use crate::change_log::CHANGE_LOG_TABLE;

/// Columns every tracked table must expose for write-back.
pub const WRITE_BACK_COLUMNS: [&str; 4] = ["id", "processed", "response", "updated_at"];

/// Rendered statements for one tracked table.
#[derive(Debug, Clone)]
pub struct TableQueries {
    pub spec: TableSpec,
    /// `$1` table name, `$2` watermark, `$3` limit.
    pub fetch: String,
    /// `$1` ids.
    pub claim: String,
    /// `$1` id, `$2` processed, `$3` response.
    pub write_back: String,
}

impl TableQueries {
    pub fn new(spec: TableSpec) -> Result<Self, SourceError> {
        spec.validate()?;
        let table = &spec.name;

        let fetch = format!(
            "SELECT c.version, c.operation, t.id::bigint, row_to_json(t)::jsonb, \
                    t.processed::boolean, t.response::text, t.updated_at::timestamptz, \
                    c.changed_at \
             FROM {CHANGE_LOG_TABLE} c \
             JOIN {table} t ON t.id = c.row_id \
             WHERE c.table_name = $1 \
               AND c.version > $2 \
               AND c.operation IN ('INSERT', 'UPDATE') \
               AND t.response IS NULL \
               AND (t.processed IS NULL OR NOT t.processed) \
             ORDER BY c.version \
             LIMIT $3"
        );
        let claim = format!(
            "UPDATE {table} SET response = '{CLAIM_MARKER}' \
             WHERE id = ANY($1::bigint[]) \
               AND response IS NULL \
               AND (processed IS NULL OR NOT processed) \
             RETURNING id::bigint"
        );
        let write_back = format!(
            "UPDATE {table} SET processed = $2, response = $3, updated_at = now() \
             WHERE id = $1::bigint"
        );

        Ok(Self {
            spec,
            fetch,
            claim,
            write_back,
        })
    }
}

/// Table name -> rendered statements.
#[derive(Debug, Clone, Default)]
pub struct QueryRegistry {
    tables: BTreeMap<String, TableQueries>,
}

impl QueryRegistry {
    pub fn new(tables: &[TableSpec]) -> Result<Self, SourceError> {
        let mut registry = BTreeMap::new();
        for spec in tables {
            let queries = TableQueries::new(spec.clone())?;
            if registry.insert(spec.name.clone(), queries).is_some() {
                return Err(SourceError::Registry(format!(
                    "table '{}' registered twice",
                    spec.name
                )));
            }
        }
        Ok(Self { tables: registry })
    }

    pub fn get(&self, table: &str) -> Result<&TableQueries, SourceError> {
        self.tables
            .get(table)
            .ok_or_else(|| SourceError::Registry(format!("table '{table}' is not registered")))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.values().map(|q| &q.spec)
    }

    /// Check that the change log and every registered table exist, and that
    /// each table has the write-back columns.
    pub async fn validate(&self, client: &Client) -> Result<(), SourceError> {
        let (schema, name) = split_qualified(CHANGE_LOG_TABLE);
        if column_names(client, schema, name).await?.is_empty() {
            return Err(SourceError::Registry(format!(
                "change log table '{CHANGE_LOG_TABLE}' does not exist; run `setup` first"
            )));
        }

        for queries in self.tables.values() {
            let table = &queries.spec.name;
            let (schema, name) = split_qualified(table);
            let columns = column_names(client, schema, name).await?;
            if columns.is_empty() {
                return Err(SourceError::Registry(format!(
                    "tracked table '{table}' does not exist"
                )));
            }
            let missing: Vec<&str> = WRITE_BACK_COLUMNS
                .iter()
                .copied()
                .filter(|c| !columns.iter().any(|have| have == c))
                .collect();
            if !missing.is_empty() {
                return Err(SourceError::Registry(format!(
                    "tracked table '{table}' is missing column(s): {}",
                    missing.join(", ")
                )));
            }
            debug!("Validated {} ({} columns)", table, columns.len());
        }
        info!("Validated {} tracked table(s)", self.tables.len());
        Ok(())
    }
}

/// `schema.table` -> (Some(schema), table); unqualified names use the search path.
pub(crate) fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, table)) => (Some(schema), table),
        None => (None, name),
    }
}

async fn column_names(
    client: &Client,
    schema: Option<&str>,
    table: &str,
) -> Result<Vec<String>, SourceError> {
    let rows = client
        .query(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = COALESCE($1::text, current_schema()) AND table_name = $2::text",
            &[&schema, &table],
        )
        .await
        .map_err(|e| SourceError::query(table, e))?;
    Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
}
