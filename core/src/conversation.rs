/// Denormalized conversation metadata
///
/// A conversation is a persistent pairing between two participants. The
/// remote record carries a preview of the last message plus a per-viewer
/// lastSeen map; both are written opportunistically and read with heavy
/// suspicion (timestamps stay raw until normalized).
use crate::time::normalize_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationMeta {
    /// Unordered pair of participant ids
    pub participants: Vec<String>,

    /// Stored (still transformed) body of the last message, if any
    pub last_message_text: Option<String>,

    /// Raw, unit-ambiguous timestamp of the last message
    pub last_message_timestamp: Option<Value>,

    pub last_message_sender_id: Option<String>,

    /// Per-viewer last-seen markers, raw values keyed by user id
    pub last_seen: HashMap<String, Value>,
}

impl ConversationMeta {
    /// Decode a remote metadata record. Never fails: a malformed record
    /// degrades to the empty default rather than breaking the list view.
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// The viewer's last-seen marker in canonical milliseconds, or `None`
    /// if the viewer has never opened this conversation.
    pub fn last_seen_ms(&self, user_id: &str) -> Option<u64> {
        self.last_seen
            .get(user_id)
            .map(|raw| normalize_timestamp(Some(raw)))
    }
}
