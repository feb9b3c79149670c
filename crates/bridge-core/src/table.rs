//! Registry entries for tracked tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Event types published by the bridge, one broker queue each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Ticket,
    Product,
    Payment,
    Shift,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Ticket,
        EventType::Product,
        EventType::Payment,
        EventType::Shift,
    ];

    /// Routing key on the events exchange.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Ticket => "ticket",
            EventType::Product => "product",
            EventType::Payment => "payment",
            EventType::Shift => "shift",
        }
    }

    /// Durable queue bound to this event type.
    pub fn queue_name(&self) -> &'static str {
        match self {
            EventType::Ticket => "pos.tickets",
            EventType::Product => "pos.products",
            EventType::Payment => "pos.payments",
            EventType::Shift => "pos.shifts",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ticket" | "tickets" => Ok(EventType::Ticket),
            "product" | "products" => Ok(EventType::Product),
            "payment" | "payments" => Ok(EventType::Payment),
            "shift" | "shifts" => Ok(EventType::Shift),
            other => Err(format!("Unknown event type: {other}")),
        }
    }
}

/// How strictly delete rows of a table are screened for closeout noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteScope {
    /// Whole-bill deletes: one closeout signal is enough to suppress.
    Ticket,
    /// Line-item deletes (products, payments): two co-occurring signals required.
    Line,
    /// Deletes are never screened.
    Exempt,
}

/// A tracked table and how its rows are handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub event_type: EventType,
    pub delete_scope: DeleteScope,
    /// Claim rows with the in-progress marker before processing them, so a
    /// second instance reading the same table skips them.
    pub claim_rows: bool,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, event_type: EventType) -> Self {
        let (delete_scope, claim_rows) = match event_type {
            EventType::Ticket => (DeleteScope::Ticket, false),
            EventType::Product => (DeleteScope::Line, false),
            EventType::Payment => (DeleteScope::Line, true),
            EventType::Shift => (DeleteScope::Exempt, false),
        };
        Self {
            name: name.into(),
            event_type,
            delete_scope,
            claim_rows,
        }
    }

    pub fn with_claim_rows(mut self, claim_rows: bool) -> Self {
        self.claim_rows = claim_rows;
        self
    }

    /// Check that the table name is safe to splice into SQL templates.
    pub fn validate(&self) -> Result<(), SourceError> {
        validate_identifier(&self.name)
    }
}

/// The four staging tables of the POS schema.
pub fn default_tables() -> Vec<TableSpec> {
    vec![
        TableSpec::new("ticket_events", EventType::Ticket),
        TableSpec::new("product_events", EventType::Product),
        TableSpec::new("payment_events", EventType::Payment),
        TableSpec::new("shift_events", EventType::Shift),
    ]
}

/// Accept `[A-Za-z_][A-Za-z0-9_]*`, optionally schema-qualified once, at most
/// 63 bytes per part (PostgreSQL's identifier limit).
pub fn validate_identifier(name: &str) -> Result<(), SourceError> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(SourceError::Registry(format!(
            "'{name}' has too many qualifiers"
        )));
    }
    for part in parts {
        let mut chars = part.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_start || !valid_rest || part.len() > 63 {
            return Err(SourceError::Registry(format!(
                "'{name}' is not a valid table identifier"
            )));
        }
    }
    Ok(())
}
