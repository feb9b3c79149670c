//! Tracked-table registry overrides.
//!
//! `--table TYPE=NAME[:claim|:no-claim]` replaces the table tracked for one
//! event type, e.g. `--table payment=pos.payment_staging:no-claim`. Event types
//! without an override keep their default table.

use anyhow::{anyhow, bail, Context};
use bridge_core::{default_tables, EventType, TableSpec};

/// One parsed `--table` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOverride {
    pub event_type: EventType,
    pub table: String,
    pub claim_rows: Option<bool>,
}

impl std::str::FromStr for TableOverride {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (event_type, rest) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected TYPE=NAME[:claim|:no-claim], got '{s}'"))?;
        let event_type: EventType = event_type.parse().map_err(anyhow::Error::msg)?;

        let (table, claim_rows) = match rest.split_once(':') {
            Some((table, "claim")) => (table, Some(true)),
            Some((table, "no-claim")) => (table, Some(false)),
            Some((_, flag)) => bail!("unknown table flag '{flag}' (expected claim or no-claim)"),
            None => (rest, None),
        };
        let table = table.trim();
        if table.is_empty() {
            bail!("missing table name in '{s}'");
        }

        Ok(Self {
            event_type,
            table: table.to_string(),
            claim_rows,
        })
    }
}

/// Default registry with `overrides` applied, validated.
pub fn resolve_tables(overrides: &[String]) -> anyhow::Result<Vec<TableSpec>> {
    let mut tables = default_tables();
    for raw in overrides {
        let o: TableOverride = raw
            .parse()
            .with_context(|| format!("Invalid --table argument '{raw}'"))?;
        let slot = tables
            .iter_mut()
            .find(|t| t.event_type == o.event_type)
            .ok_or_else(|| anyhow!("no default table for event type {}", o.event_type))?;
        let mut spec = TableSpec::new(o.table, o.event_type);
        if let Some(claim) = o.claim_rows {
            spec = spec.with_claim_rows(claim);
        }
        *slot = spec;
    }

    for (i, table) in tables.iter().enumerate() {
        table.validate()?;
        if tables[..i].iter().any(|t| t.name == table.name) {
            bail!("table '{}' is tracked for more than one event type", table.name);
        }
    }
    Ok(tables)
}
