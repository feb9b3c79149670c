//! Row classification derived from the staging table's event-type column.

use std::fmt;

/// What a staging row says happened to its business entity.
///
/// Parsing is lenient about spelling (`CANCELED` / `CANCELLED`, `CLOSE` /
/// `CLOSED`, ...) because the writers of the staging schema are not ours.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Classification {
    Open,
    Update,
    Paid,
    Closed,
    Cancelled,
    Deleted,
    Split,
    ShiftOpened,
    ShiftClosed,
    Other(String),
}

impl Classification {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "OPEN" | "OPENED" | "NEW" | "CREATED" | "INSERT" => Classification::Open,
            "UPDATE" | "UPDATED" | "MODIFIED" | "CHANGED" => Classification::Update,
            "PAID" | "PAYMENT" | "SETTLED" => Classification::Paid,
            "CLOSE" | "CLOSED" => Classification::Closed,
            "CANCEL" | "CANCELLED" | "CANCELED" | "VOID" | "VOIDED" => Classification::Cancelled,
            "DELETE" | "DELETED" | "REMOVE" | "REMOVED" => Classification::Deleted,
            "SPLIT" | "SPLITTED" => Classification::Split,
            "SHIFT_OPEN" | "SHIFT_OPENED" => Classification::ShiftOpened,
            "SHIFT_CLOSE" | "SHIFT_CLOSED" | "CLOSEOUT" => Classification::ShiftClosed,
            _ => Classification::Other(normalized),
        }
    }

    /// Rows announcing that an entity went away.
    pub fn is_delete(&self) -> bool {
        matches!(self, Classification::Cancelled | Classification::Deleted)
    }

    /// Bill status transitions counted by the closeout heuristics.
    pub fn is_bill_transition(&self) -> bool {
        matches!(self, Classification::Paid | Classification::Closed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Classification::Open => "OPEN",
            Classification::Update => "UPDATE",
            Classification::Paid => "PAID",
            Classification::Closed => "CLOSED",
            Classification::Cancelled => "CANCELLED",
            Classification::Deleted => "DELETED",
            Classification::Split => "SPLIT",
            Classification::ShiftOpened => "SHIFT_OPENED",
            Classification::ShiftClosed => "SHIFT_CLOSED",
            Classification::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
