//! Outbound broker messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::table::EventType;

/// Key under which the metadata envelope is embedded in the JSON body.
pub const METADATA_FIELD: &str = "_metadata";

/// Envelope attached to every published body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Host that emitted the message
    pub source: String,
    /// Emission time, serialized as RFC 3339
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    /// Unique per publish attempt; retries get a new id
    pub message_id: String,
}

/// One message per surviving change record.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub body: Map<String, Value>,
    pub metadata: MessageMetadata,
}

impl OutboundMessage {
    pub fn new(event_type: EventType, body: Map<String, Value>, source: &str) -> Self {
        Self {
            body,
            metadata: MessageMetadata {
                source: source.to_string(),
                timestamp: Utc::now(),
                event_type,
                message_id: uuid::Uuid::new_v4().to_string(),
            },
        }
    }

    pub fn event_type(&self) -> EventType {
        self.metadata.event_type
    }

    pub fn message_id(&self) -> &str {
        &self.metadata.message_id
    }

    /// Domain fields plus the `_metadata` envelope.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        let mut body = self.body.clone();
        body.insert(
            METADATA_FIELD.to_string(),
            serde_json::to_value(&self.metadata)?,
        );
        Ok(Value::Object(body))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_json()?)
    }
}
