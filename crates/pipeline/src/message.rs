//! Outbound message bodies.
//!
//! Every body carries the common fields (`id`, `table`, `version`,
//! `operation`, `status`, `folio`), the fields specific to its event type,
//! an optional `split` block and the untouched source row under `row`.
//! Money is rendered as a decimal string with two places.

use bridge_core::{ChangeRecord, EventType, OutboundMessage, TableSpec};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use crate::error::ProcessError;

const TOTAL_COLUMNS: &[&str] = &["total", "amount_total", "bill_total"];
const AMOUNT_COLUMNS: &[&str] = &["amount", "payment_amount"];
const TIP_COLUMNS: &[&str] = &["tip", "gratuity"];
const PRICE_COLUMNS: &[&str] = &["price", "unit_price"];
const QUANTITY_COLUMNS: &[&str] = &["quantity", "qty"];
const WAITER_COLUMNS: &[&str] = &["waiter_id", "waiter"];
const TABLE_NUMBER_COLUMNS: &[&str] = &["table_number", "table_no", "mesa"];
const CASHIER_COLUMNS: &[&str] = &["cashier_id", "cashier", "user_id"];

/// Split correlation attached to a message.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitContext {
    pub key: String,
    /// The product was already handled under this split (moved between bills).
    pub reallocated: bool,
}

pub fn build_message(
    table: &TableSpec,
    record: &ChangeRecord,
    split: Option<&SplitContext>,
    source: &str,
) -> Result<OutboundMessage, ProcessError> {
    let mut body = Map::new();
    body.insert("id".into(), json!(record.id));
    body.insert("table".into(), json!(record.table));
    body.insert("version".into(), json!(record.version));
    body.insert("operation".into(), json!(record.operation.as_str()));
    body.insert("status".into(), json!(record.classification().as_str()));

    let folio = record.folio();
    if folio.is_none() && table.event_type != EventType::Shift {
        return Err(ProcessError::MissingField {
            table: table.name.clone(),
            id: record.id,
            field: "folio",
        });
    }
    body.insert("folio".into(), json!(folio));

    match table.event_type {
        EventType::Ticket => {
            body.insert("total".into(), money(table, record, "total", TOTAL_COLUMNS)?);
            body.insert("shiftId".into(), json!(record.shift_id()));
            body.insert("waiterId".into(), json!(record.text(WAITER_COLUMNS)));
            body.insert("tableNumber".into(), json!(record.text(TABLE_NUMBER_COLUMNS)));
        }
        EventType::Product => {
            body.insert("productId".into(), json!(record.product_id()));
            body.insert(
                "quantity".into(),
                json!(record.decimal(QUANTITY_COLUMNS).map(|q| q.normalize().to_string())),
            );
            body.insert("price".into(), money(table, record, "price", PRICE_COLUMNS)?);
        }
        EventType::Payment => {
            body.insert("paymentMethod".into(), json!(record.payment_method()));
            body.insert("amount".into(), money(table, record, "amount", AMOUNT_COLUMNS)?);
            body.insert("tip".into(), money(table, record, "tip", TIP_COLUMNS)?);
        }
        EventType::Shift => {
            body.insert("shiftId".into(), json!(record.shift_id()));
            body.insert("cashierId".into(), json!(record.text(CASHIER_COLUMNS)));
        }
    }

    if let Some(split) = split {
        body.insert(
            "split".into(),
            json!({
                "key": split.key,
                "bills": split.key.split(',').collect::<Vec<_>>(),
                "reallocated": split.reallocated,
            }),
        );
    }
    body.insert("row".into(), Value::Object(record.payload.clone()));

    Ok(OutboundMessage::new(table.event_type, body, source))
}

/// Absent money columns become `null`; present but unparseable ones are an error.
fn money(
    table: &TableSpec,
    record: &ChangeRecord,
    field: &'static str,
    aliases: &[&str],
) -> Result<Value, ProcessError> {
    let present = aliases
        .iter()
        .filter_map(|name| record.field(name))
        .find(|v| !v.is_null());
    let Some(raw) = present else {
        return Ok(Value::Null);
    };
    let amount = record
        .decimal(aliases)
        .ok_or_else(|| ProcessError::InvalidField {
            table: table.name.clone(),
            id: record.id,
            field,
            value: raw.to_string(),
        })?;
    Ok(Value::String(format_money(amount)))
}

pub fn format_money(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    rounded.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::Operation;
    use std::str::FromStr;

    fn record(table: &str, payload: Value) -> ChangeRecord {
        let Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        ChangeRecord::new(table, 3, 102, Operation::Update, map)
    }

    #[test]
    fn test_ticket_body() {
        let table = TableSpec::new("ticket_events", EventType::Ticket);
        let r = record("ticket_events", json!({"Folio": 55, "EventType": "PAID", "Total": 250, "shift_id": 4}));
        let msg = build_message(&table, &r, None, "host").unwrap();
        let json = msg.to_json().unwrap();

        assert_eq!(json["status"], "PAID");
        assert_eq!(json["total"], "250.00");
        assert_eq!(json["folio"], "55");
        assert_eq!(json["shiftId"], "4");
        assert_eq!(json["operation"], "UPDATE");
        assert_eq!(json["row"]["Total"], 250);
        assert_eq!(json["_metadata"]["eventType"], "ticket");
        assert!(json.get("split").is_none());
    }

    #[test]
    fn test_payment_body_with_split() {
        let table = TableSpec::new("payment_events", EventType::Payment);
        let r = record("payment_events", json!({"folio": "101", "payment_method": "card", "amount": "99.5"}));
        let split = SplitContext {
            key: "100,101,102".to_string(),
            reallocated: false,
        };
        let json = build_message(&table, &r, Some(&split), "host")
            .unwrap()
            .to_json()
            .unwrap();

        assert_eq!(json["amount"], "99.50");
        assert_eq!(json["tip"], Value::Null);
        assert_eq!(json["paymentMethod"], "card");
        assert_eq!(json["split"]["bills"], json!(["100", "101", "102"]));
    }

    #[test]
    fn test_row_errors() {
        let table = TableSpec::new("ticket_events", EventType::Ticket);
        let no_folio = record("ticket_events", json!({"status": "open"}));
        assert!(matches!(
            build_message(&table, &no_folio, None, "h"),
            Err(ProcessError::MissingField { field: "folio", .. })
        ));

        let bad_total = record("ticket_events", json!({"folio": 1, "total": "abc"}));
        assert!(matches!(
            build_message(&table, &bad_total, None, "h"),
            Err(ProcessError::InvalidField { field: "total", .. })
        ));
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(Decimal::from_str("250").unwrap()), "250.00");
        assert_eq!(format_money(Decimal::from_str("10.005").unwrap()), "10.00");
        assert_eq!(format_money(Decimal::from_str("3.1").unwrap()), "3.10");
    }
}
