/// Typed chat messages and the remote record parser
use crate::obfuscate;
use crate::time::normalize_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Delivery state of one message as seen by the rendered view.
///
/// Pending and Failed only ever describe local tickets; anything parsed from
/// the remote stream is Committed by definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Committed,
    Failed,
}

/// One chat message in display form (body already decoded).
///
/// The id is client-generated at send time and reused as the remote record
/// key, so the later remote arrival is recognized as the same entity rather
/// than a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub timestamp_ms: u64,
    pub status: DeliveryStatus,
}

// Field names accepted from remote records. Older clients wrote different
// keys; the parser probes them in order.
const SENDER_FIELDS: &[&str] = &["senderId", "sender", "from"];
const BODY_FIELDS: &[&str] = &["text", "message", "body"];
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "createdAt", "time"];

fn first_string<'a>(record: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|f| record.get(*f).and_then(Value::as_str))
}

fn first_present<'a>(record: &'a Value, fields: &[&str]) -> Option<&'a Value> {
    fields
        .iter()
        .find_map(|f| record.get(*f).filter(|v| !v.is_null()))
}

/// Validate and convert a raw remote record into a typed `Message`.
///
/// Returns `None` for records without a sender; those are dropped silently
/// (logged at debug) and never surfaced. The stored body is decoded via
/// `obfuscate::untransform`; decoding cannot fail, and an undecodable-looking
/// result is accepted as-is rather than losing the message.
pub fn parse_message(id: &str, conversation_id: &str, raw: &Value, shift: u8) -> Option<Message> {
    let sender_id = match first_string(raw, SENDER_FIELDS) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => {
            debug!("Dropping remote record {}: missing sender", id);
            return None;
        }
    };

    let stored = first_string(raw, BODY_FIELDS).unwrap_or("");
    let body = obfuscate::untransform(stored, shift);
    let timestamp_ms = normalize_timestamp(first_present(raw, TIMESTAMP_FIELDS));

    Some(Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id,
        body,
        timestamp_ms,
        status: DeliveryStatus::Committed,
    })
}
