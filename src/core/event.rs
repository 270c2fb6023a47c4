//! Live change notifications and their wire decoding.
//!
//! The server pushes JSON messages shaped like
//! `{"type": "updated", "resource": "printer", "date": "...", "payload": {...}}`.
//! Keep-alive replies (`{"status": "healthy"}`) share the socket and are not
//! events at all.

use super::{Fields, RecordId, Result, Value, ViewError};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Created { id: RecordId },
    Updated { id: RecordId, changed: Fields },
    Deleted { id: RecordId },
}

impl LiveEvent {
    pub fn id(&self) -> &RecordId {
        match self {
            Self::Created { id } | Self::Updated { id, .. } | Self::Deleted { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
        }
    }

    /// Encodes the event in the same shape [`decode_message`] accepts.
    pub fn to_message(&self, resource: &str, date: DateTime<Utc>) -> JsonValue {
        let mut payload = serde_json::Map::new();
        payload.insert("id".into(), self.id().to_value().into());
        if let Self::Updated { changed, .. } = self {
            for (field, value) in changed {
                payload.insert(field.clone(), value.clone().into());
            }
        }
        serde_json::json!({
            "type": self.kind(),
            "resource": resource,
            "date": date.to_rfc3339(),
            "payload": JsonValue::Object(payload),
        })
    }
}

/// A decoded message together with its envelope metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveMessage {
    pub event: LiveEvent,
    pub resource: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// Outcome of decoding one raw channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(LiveMessage),
    KeepAlive,
}

pub fn decode_message(raw: &JsonValue) -> Result<Decoded> {
    let object = raw
        .as_object()
        .ok_or_else(|| malformed(format!("expected a JSON object, got {}", raw)))?;

    if !object.contains_key("type") && object.contains_key("status") {
        return Ok(Decoded::KeepAlive);
    }

    let kind = object
        .get("type")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| malformed("missing string field 'type'"))?;

    let resource = match object.get("resource") {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(resource)) => Some(resource.clone()),
        Some(other) => return Err(malformed(format!("'resource' must be a string, got {}", other))),
    };

    let date = match object.get("date") {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(date)) => Some(
            DateTime::parse_from_rfc3339(date)
                .map_err(|e| malformed(format!("invalid date '{}': {}", date, e)))?
                .with_timezone(&Utc),
        ),
        Some(other) => return Err(malformed(format!("'date' must be a string, got {}", other))),
    };

    let payload = object
        .get("payload")
        .and_then(JsonValue::as_object)
        .ok_or_else(|| malformed("missing object field 'payload'"))?;

    let id = payload
        .get("id")
        .and_then(RecordId::from_json)
        .ok_or_else(|| malformed("payload has no usable 'id'"))?;

    let event = match kind {
        "added" | "created" => LiveEvent::Created { id },
        "deleted" => LiveEvent::Deleted { id },
        "updated" => {
            let changed = payload
                .iter()
                .filter(|(field, _)| field.as_str() != "id")
                .map(|(field, value)| (field.clone(), Value::from(value.clone())))
                .collect();
            LiveEvent::Updated { id, changed }
        }
        other => return Err(malformed(format!("unknown event type '{}'", other))),
    };

    Ok(Decoded::Event(LiveMessage {
        event,
        resource,
        date,
    }))
}

fn malformed(reason: impl Into<String>) -> ViewError {
    ViewError::MalformedEvent(reason.into())
}
