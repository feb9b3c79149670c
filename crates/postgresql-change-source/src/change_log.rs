//! Change-log installation.
//!
//! Every tracked table gets its own trigger function writing
//! `(table_name, row_id, operation)` into `pos_change_log`. Updates that only
//! touch the outcome columns are not logged, so claims and write-backs by the
//! bridge itself never show up as new changes.

use anyhow::{Context, Result};
use bridge_core::TableSpec;
use deadpool_postgres::Client;
use tracing::{info, warn};

use crate::registry::{QueryRegistry, WRITE_BACK_COLUMNS};

pub const CHANGE_LOG_TABLE: &str = "pos_change_log";

fn create_change_log_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {CHANGE_LOG_TABLE} (
            version BIGSERIAL PRIMARY KEY,
            table_name TEXT NOT NULL,
            row_id BIGINT NOT NULL,
            operation TEXT NOT NULL,
            changed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        CREATE INDEX IF NOT EXISTS {CHANGE_LOG_TABLE}_table_version_idx
            ON {CHANGE_LOG_TABLE} (table_name, version);"
    )
}

/// Trigger function name and body for one table.
fn trigger_function_sql(table: &TableSpec) -> (String, String) {
    let suffix = table.name.replace('.', "_");
    let func_name = format!("pos_bridge_track_{suffix}");
    let ignored: Vec<String> = WRITE_BACK_COLUMNS
        .iter()
        .filter(|c| **c != "id")
        .map(|c| format!(" - '{c}'"))
        .collect();
    let ignored = ignored.concat();
    let registered = &table.name;

    let sql = format!(
        "CREATE OR REPLACE FUNCTION {func_name}() RETURNS TRIGGER AS $$
        BEGIN
            IF TG_OP = 'DELETE' THEN
                INSERT INTO {CHANGE_LOG_TABLE} (table_name, row_id, operation)
                VALUES ('{registered}', OLD.id, TG_OP);
                RETURN OLD;
            END IF;
            IF TG_OP = 'UPDATE'
               AND (to_jsonb(NEW){ignored}) = (to_jsonb(OLD){ignored}) THEN
                RETURN NEW;
            END IF;
            INSERT INTO {CHANGE_LOG_TABLE} (table_name, row_id, operation)
            VALUES ('{registered}', NEW.id, TG_OP);
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql"
    );
    (func_name, sql)
}

/// Create the change log and (re)create the trigger of every registered table.
pub async fn install_change_log(client: &Client, registry: &QueryRegistry) -> Result<()> {
    client
        .batch_execute(&create_change_log_sql())
        .await
        .context("Failed to create change log table")?;
    info!("Created change log table: {}", CHANGE_LOG_TABLE);

    for table in registry.tables() {
        let (func, body) = trigger_function_sql(table);
        client
            .batch_execute(&body)
            .await
            .with_context(|| format!("Failed to create trigger function for {}", table.name))?;

        let trigger = format!("{func}_trigger");
        let drop_trigger = format!("DROP TRIGGER IF EXISTS {trigger} ON {}", table.name);
        if let Err(e) = client.batch_execute(&drop_trigger).await {
            warn!("Failed to drop existing trigger on {}: {e}", table.name);
        }

        let create_trigger = format!(
            "CREATE TRIGGER {trigger}
            AFTER INSERT OR UPDATE OR DELETE ON {}
            FOR EACH ROW EXECUTE FUNCTION {func}()",
            table.name
        );
        client
            .batch_execute(&create_trigger)
            .await
            .with_context(|| format!("Failed to create tracking trigger on {}", table.name))?;
        info!("Created tracking trigger for table: {}", table.name);
    }
    Ok(())
}

/// Highest logged version for `table`, 0 when nothing was logged yet.
pub(crate) const CURRENT_VERSION_SQL: &str =
    "SELECT COALESCE(MAX(version), 0)::bigint FROM pos_change_log WHERE table_name = $1";

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::EventType;

    #[test]
    fn test_trigger_skips_outcome_only_updates() {
        let (func, sql) = trigger_function_sql(&TableSpec::new("pos.ticket_events", EventType::Ticket));
        assert_eq!(func, "pos_bridge_track_pos_ticket_events");
        assert!(sql.contains("VALUES ('pos.ticket_events', NEW.id, TG_OP)"));
        assert!(sql.contains("(to_jsonb(NEW) - 'processed' - 'response' - 'updated_at')"));
    }

    #[test]
    fn test_current_version_reads_change_log() {
        assert!(CURRENT_VERSION_SQL.contains(CHANGE_LOG_TABLE));
        assert!(create_change_log_sql().contains("version BIGSERIAL PRIMARY KEY"));
    }
}
