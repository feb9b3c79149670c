//! Change records read from the staging schema.
//!
//! A [`ChangeRecord`] carries the full row payload as a JSON object. The
//! staging schema is not ours, so column lookups are tolerant: names are
//! matched case-insensitively with underscores ignored (`EventType`,
//! `event_type` and `eventtype` are the same column), and each logical field
//! has a short list of accepted aliases.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::classification::Classification;

const CLASSIFICATION_COLUMNS: &[&str] = &["event_type", "status", "action"];
const FOLIO_COLUMNS: &[&str] = &["folio", "bill_id", "ticket_id"];
const SHIFT_COLUMNS: &[&str] = &["shift_id", "shift"];
const PRODUCT_COLUMNS: &[&str] = &["product_id", "product_code", "sku"];
const PAYMENT_METHOD_COLUMNS: &[&str] = &["payment_method", "payment_type"];
const SPLIT_ROLE_COLUMNS: &[&str] = &["split_role"];
const SPLIT_MARKER_COLUMNS: &[&str] = &["is_split", "split"];
const PARENT_COLUMNS: &[&str] = &["parent_folio", "split_parent", "original_folio"];
const CHILDREN_COLUMNS: &[&str] = &["child_folios", "split_children", "split_folios"];

/// Change-log operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" | "I" => Ok(Operation::Insert),
            "UPDATE" | "U" => Ok(Operation::Update),
            "DELETE" | "D" => Ok(Operation::Delete),
            other => Err(format!("Unknown operation type: {other}")),
        }
    }
}

/// Which side of a bill split a row is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitRole {
    Parent,
    Child,
    /// Flagged as split without saying which side.
    Marked,
}

/// The bill identifiers a split participant declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitDeclaration {
    pub role: SplitRole,
    pub own: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
}

impl SplitDeclaration {
    /// Sorted, de-duplicated union of own, parent and child ids.
    pub fn bill_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        ids.insert(self.own.clone());
        ids.extend(self.parent.iter().cloned());
        ids.extend(self.children.iter().cloned());
        ids
    }
}

/// A pending row returned by the change source.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub table: String,
    pub id: i64,
    pub version: i64,
    pub operation: Operation,
    pub payload: Map<String, Value>,
    pub processed: Option<bool>,
    pub response: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    /// When the change was logged. Closeout windows are measured on this.
    pub changed_at: Option<DateTime<Utc>>,
}

impl ChangeRecord {
    pub fn new(
        table: impl Into<String>,
        id: i64,
        version: i64,
        operation: Operation,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            table: table.into(),
            id,
            version,
            operation,
            payload,
            processed: None,
            response: None,
            updated_at: None,
            changed_at: None,
        }
    }

    /// A row is pending until this system writes its outcome columns.
    ///
    /// Mirrors the change source's read filter: a non-null response (including
    /// the claim marker) or a true processed flag excludes the row.
    pub fn is_pending(&self) -> bool {
        self.processed != Some(true) && self.response.is_none()
    }

    /// Look a column up, case-insensitively and ignoring underscores.
    pub fn field(&self, name: &str) -> Option<&Value> {
        if let Some(v) = self.payload.get(name) {
            return Some(v);
        }
        let wanted = normalize_column(name);
        self.payload
            .iter()
            .find(|(k, _)| normalize_column(k) == wanted)
            .map(|(_, v)| v)
    }

    /// First non-null alias rendered as trimmed, non-empty text.
    pub fn text(&self, aliases: &[&str]) -> Option<String> {
        aliases
            .iter()
            .filter_map(|name| self.field(name))
            .find_map(value_as_text)
    }

    /// First alias that parses as a decimal.
    pub fn decimal(&self, aliases: &[&str]) -> Option<Decimal> {
        aliases
            .iter()
            .filter_map(|name| self.field(name))
            .find_map(|v| match v {
                Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
                Value::String(s) => Decimal::from_str(s.trim()).ok(),
                _ => None,
            })
    }

    pub fn classification(&self) -> Classification {
        match self.text(CLASSIFICATION_COLUMNS) {
            Some(raw) => Classification::parse(&raw),
            None => match self.operation {
                Operation::Insert => Classification::Open,
                Operation::Update => Classification::Update,
                Operation::Delete => Classification::Deleted,
            },
        }
    }

    /// Business bill identifier.
    pub fn folio(&self) -> Option<String> {
        self.text(FOLIO_COLUMNS)
    }

    pub fn shift_id(&self) -> Option<String> {
        self.text(SHIFT_COLUMNS)
    }

    pub fn product_id(&self) -> Option<String> {
        self.text(PRODUCT_COLUMNS)
    }

    pub fn payment_method(&self) -> Option<String> {
        self.text(PAYMENT_METHOD_COLUMNS)
    }

    /// The split this row participates in, if it is flagged as a participant.
    ///
    /// A row counts as a participant when it declares a split role, carries a
    /// truthy split marker, is classified `SPLIT`, or names a parent or
    /// children. Rows without a folio cannot be correlated and return `None`.
    pub fn split(&self) -> Option<SplitDeclaration> {
        let own = self.folio()?;
        let parent = self.text(PARENT_COLUMNS).filter(|p| *p != own);
        let children: Vec<String> = CHILDREN_COLUMNS
            .iter()
            .filter_map(|name| self.field(name))
            .flat_map(value_as_list)
            .filter(|c| *c != own)
            .collect();

        let declared_role = self
            .text(SPLIT_ROLE_COLUMNS)
            .map(|r| r.to_ascii_uppercase());
        let marked = SPLIT_MARKER_COLUMNS
            .iter()
            .filter_map(|name| self.field(name))
            .any(value_is_truthy)
            || self.classification() == Classification::Split;

        let role = match declared_role.as_deref() {
            Some("PARENT") | Some("ORIGINAL") => SplitRole::Parent,
            Some("CHILD") => SplitRole::Child,
            _ if !children.is_empty() => SplitRole::Parent,
            _ if parent.is_some() => SplitRole::Child,
            _ if marked || declared_role.is_some() => SplitRole::Marked,
            _ => return None,
        };

        Some(SplitDeclaration {
            role,
            own,
            parent,
            children,
        })
    }
}

fn normalize_column(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn value_as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn value_as_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_as_text).collect(),
        Value::String(s) => s
            .split([',', ';'])
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        other => value_as_text(other).into_iter().collect(),
    }
}

fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().map(|i| i != 0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "t" | "yes" | "y"
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(payload: Value) -> ChangeRecord {
        let Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        ChangeRecord::new("ticket_events", 1, 1, Operation::Insert, map)
    }

    #[test]
    fn test_field_lookup_ignores_case_and_underscores() {
        let r = record(json!({"Folio": 55, "EventType": "paid", "Total": "250.00"}));
        assert_eq!(r.folio().as_deref(), Some("55"));
        assert_eq!(r.classification(), Classification::Paid);
        assert_eq!(r.decimal(&["total"]).unwrap().to_string(), "250.00");
    }

    #[test]
    fn test_classification_falls_back_to_operation() {
        let mut r = record(json!({"folio": 1}));
        assert_eq!(r.classification(), Classification::Open);
        r.operation = Operation::Update;
        assert_eq!(r.classification(), Classification::Update);
    }

    #[test]
    fn test_pending_filter() {
        let mut r = record(json!({}));
        assert!(r.is_pending());
        r.processed = Some(false);
        assert!(r.is_pending());
        r.response = Some("processing".to_string());
        assert!(!r.is_pending());
        r.response = None;
        r.processed = Some(true);
        assert!(!r.is_pending());
    }

    #[test]
    fn test_split_parent_with_children() {
        let r = record(json!({"folio": 100, "split_role": "parent", "child_folios": "101, 102"}));
        let split = r.split().unwrap();
        assert_eq!(split.role, SplitRole::Parent);
        let ids: Vec<String> = split.bill_ids().into_iter().collect();
        assert_eq!(ids, vec!["100", "101", "102"]);
    }

    #[test]
    fn test_split_child_inferred_from_parent() {
        let r = record(json!({"folio": 101, "parent_folio": 100}));
        let split = r.split().unwrap();
        assert_eq!(split.role, SplitRole::Child);
        assert_eq!(split.parent.as_deref(), Some("100"));
    }

    #[test]
    fn test_split_children_json_array_and_marker() {
        let r = record(json!({"folio": "7", "is_split": 1, "split_children": [8, "9", 7]}));
        let split = r.split().unwrap();
        assert_eq!(split.children, vec!["8", "9"]);
    }

    #[test]
    fn test_not_a_split_participant() {
        let r = record(json!({"folio": 5, "is_split": false, "parent_folio": null}));
        assert!(r.split().is_none());
        let no_folio = record(json!({"split_role": "CHILD"}));
        assert!(no_folio.split().is_none());
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!("insert".parse::<Operation>().unwrap(), Operation::Insert);
        assert_eq!("D".parse::<Operation>().unwrap(), Operation::Delete);
        assert!("MERGE".parse::<Operation>().is_err());
    }
}
