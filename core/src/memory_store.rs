/// In-memory remote store
///
/// Backs the demo binary and the integration tests. Mimics the contract the
/// engine expects from a real backend: writes are serialized, every change
/// re-broadcasts the FULL message snapshot (never a delta), and null
/// timestamp fields are replaced with the store's own clock. Fault injection
/// hooks cover the failure paths.
use crate::error::{Result, SyncError};
use crate::remote::{MessageSnapshot, RemoteStore, Subscription};
use crate::time::now_ms;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

// Ordered message log: (record id, raw record) in delivery order.
type MessageLog = Vec<(String, Value)>;

#[derive(Default)]
struct Inner {
    /// conversation id -> current-format message log
    messages: HashMap<String, MessageLog>,
    /// conversation id -> metadata record
    meta: HashMap<String, Value>,
    /// conversation id -> legacy flat message log
    legacy: HashMap<String, MessageLog>,
    message_subs: HashMap<String, HashMap<u64, mpsc::UnboundedSender<MessageSnapshot>>>,
    meta_subs: HashMap<String, HashMap<u64, mpsc::UnboundedSender<Value>>>,
}

pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    next_sub_id: AtomicU64,
    fail_next_write: AtomicBool,
    fail_meta_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            next_sub_id: AtomicU64::new(1),
            fail_next_write: AtomicBool::new(false),
            fail_meta_writes: AtomicBool::new(false),
        }
    }

    /// Make the next `write_message` fail once.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Make every `update_conversation_meta` fail until reset.
    pub fn fail_meta_writes(&self, fail: bool) {
        self.fail_meta_writes.store(fail, Ordering::SeqCst);
    }

    /// Seed a record into the legacy flat container (pre-migration data).
    pub fn seed_legacy_message(&self, conversation_id: &str, record: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .legacy
            .entry(conversation_id.to_string())
            .or_default()
            .push((format!("legacy-{}", now_ms()), record));
    }

    /// Seed a committed record directly into the current-format container,
    /// bypassing the write path (no broadcast).
    pub fn seed_message(&self, conversation_id: &str, message_id: &str, record: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push((message_id.to_string(), record));
    }

    /// Replace a conversation's metadata record and notify subscribers.
    pub fn set_meta(&self, conversation_id: &str, meta: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.meta.insert(conversation_id.to_string(), meta.clone());
        Self::broadcast_meta(&mut inner, conversation_id, meta);
    }

    /// Current metadata record, if any (test observability).
    pub fn meta(&self, conversation_id: &str) -> Option<Value> {
        self.inner.lock().unwrap().meta.get(conversation_id).cloned()
    }

    /// Live message-stream subscriber count (test observability).
    pub fn message_subscriber_count(&self, conversation_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .message_subs
            .get(conversation_id)
            .map_or(0, HashMap::len)
    }

    /// Live metadata subscriber count (test observability).
    pub fn meta_subscriber_count(&self, conversation_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .meta_subs
            .get(conversation_id)
            .map_or(0, HashMap::len)
    }

    fn broadcast_messages(inner: &mut Inner, conversation_id: &str) {
        let snapshot = inner
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        if let Some(subs) = inner.message_subs.get_mut(conversation_id) {
            subs.retain(|_, tx| tx.send(snapshot.clone()).is_ok());
        }
    }

    fn broadcast_meta(inner: &mut Inner, conversation_id: &str, meta: Value) {
        if let Some(subs) = inner.meta_subs.get_mut(conversation_id) {
            subs.retain(|_, tx| tx.send(meta.clone()).is_ok());
        }
    }

    // Null timestamp fields mean "server-assigned": fill them now.
    fn assign_server_timestamps(record: &mut Value) {
        if let Some(map) = record.as_object_mut() {
            for key in ["timestamp", "lastMessageTimestamp"] {
                if map.get(key).is_some_and(Value::is_null) {
                    map.insert(key.to_string(), Value::from(now_ms()));
                }
            }
        }
    }

    // Merge `partial` into `target` one object level deep, so a lastSeen
    // update for one viewer does not clobber the other viewer's marker.
    fn merge_partial(target: &mut Value, partial: Value) {
        let Value::Object(partial) = partial else {
            *target = partial;
            return;
        };
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        let map = target.as_object_mut().unwrap();
        for (key, value) in partial {
            match (map.get_mut(&key), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    for (k, v) in incoming {
                        existing.insert(k, v);
                    }
                }
                (_, value) => {
                    map.insert(key, value);
                }
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn subscribe_messages(
        &self,
        conversation_id: &str,
        tx: mpsc::UnboundedSender<MessageSnapshot>,
    ) -> Subscription {
        let sub_id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();

        // Deliver the current full snapshot immediately
        let snapshot = inner
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        let _ = tx.send(snapshot);

        inner
            .message_subs
            .entry(conversation_id.to_string())
            .or_default()
            .insert(sub_id, tx);

        let handle = Arc::clone(&self.inner);
        let conversation_id = conversation_id.to_string();
        Subscription::new(move || {
            let mut inner = handle.lock().unwrap();
            if let Some(subs) = inner.message_subs.get_mut(&conversation_id) {
                subs.remove(&sub_id);
            }
            debug!("Message subscription {} for {} released", sub_id, conversation_id);
        })
    }

    fn subscribe_conversation_meta(
        &self,
        conversation_id: &str,
        tx: mpsc::UnboundedSender<Value>,
    ) -> Subscription {
        let sub_id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();

        if let Some(meta) = inner.meta.get(conversation_id) {
            let _ = tx.send(meta.clone());
        }

        inner
            .meta_subs
            .entry(conversation_id.to_string())
            .or_default()
            .insert(sub_id, tx);

        let handle = Arc::clone(&self.inner);
        let conversation_id = conversation_id.to_string();
        Subscription::new(move || {
            let mut inner = handle.lock().unwrap();
            if let Some(subs) = inner.meta_subs.get_mut(&conversation_id) {
                subs.remove(&sub_id);
            }
            debug!("Meta subscription {} for {} released", sub_id, conversation_id);
        })
    }

    async fn write_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        mut record: Value,
    ) -> Result<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Remote("injected write failure".to_string()));
        }

        Self::assign_server_timestamps(&mut record);

        let mut inner = self.inner.lock().unwrap();
        let log = inner
            .messages
            .entry(conversation_id.to_string())
            .or_default();
        // Same id means same entity: replace in place, keep delivery order
        if let Some(slot) = log.iter_mut().find(|(id, _)| id == message_id) {
            slot.1 = record;
        } else {
            log.push((message_id.to_string(), record));
        }
        Self::broadcast_messages(&mut inner, conversation_id);
        Ok(())
    }

    async fn update_conversation_meta(&self, conversation_id: &str, partial: Value) -> Result<()> {
        if self.fail_meta_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Remote("injected meta write failure".to_string()));
        }

        let mut partial = partial;
        Self::assign_server_timestamps(&mut partial);

        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .meta
            .entry(conversation_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        Self::merge_partial(entry, partial);
        let merged = entry.clone();
        Self::broadcast_meta(&mut inner, conversation_id, merged);
        Ok(())
    }

    async fn read_latest(&self, container: &str) -> Result<Option<Value>> {
        let inner = self.inner.lock().unwrap();
        let segments: Vec<&str> = container.split('/').collect();
        let latest = match segments.as_slice() {
            ["conversations", id, "messages"] => inner
                .messages
                .get(*id)
                .and_then(|log| log.last())
                .map(|(_, record)| record.clone()),
            ["messages", id] => inner
                .legacy
                .get(*id)
                .and_then(|log| log.last())
                .map(|(_, record)| record.clone()),
            _ => return Err(SyncError::UnknownContainer(container.to_string())),
        };
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_broadcasts_full_snapshot() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = store.subscribe_messages("c1", tx);

        // Initial empty snapshot on subscribe
        assert_eq!(rx.recv().await.unwrap(), vec![]);

        store
            .write_message("c1", "m1", json!({ "senderId": "a", "text": "x", "timestamp": 1 }))
            .await
            .unwrap();
        store
            .write_message("c1", "m2", json!({ "senderId": "a", "text": "y", "timestamp": 2 }))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);
        let second = rx.recv().await.unwrap();
        // Full set again, not a delta
        assert_eq!(second.len(), 2);

        sub.unsubscribe();
        assert_eq!(store.message_subscriber_count("c1"), 0);
    }

    #[tokio::test]
    async fn test_server_timestamp_assigned_for_null() {
        let store = MemoryStore::new();
        store
            .write_message("c1", "m1", json!({ "senderId": "a", "text": "x", "timestamp": null }))
            .await
            .unwrap();
        let latest = store.read_latest("conversations/c1/messages").await.unwrap().unwrap();
        assert!(latest["timestamp"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_meta_merge_keeps_other_viewer_last_seen() {
        let store = MemoryStore::new();
        store
            .update_conversation_meta("c1", json!({ "lastSeen": { "alice": 100 } }))
            .await
            .unwrap();
        store
            .update_conversation_meta("c1", json!({ "lastSeen": { "bob": 200 } }))
            .await
            .unwrap();

        let meta = store.meta("c1").unwrap();
        assert_eq!(meta["lastSeen"]["alice"], 100);
        assert_eq!(meta["lastSeen"]["bob"], 200);
    }

    #[tokio::test]
    async fn test_read_latest_unknown_container() {
        let store = MemoryStore::new();
        assert!(store.read_latest("nope/what/ever/else").await.is_err());
        assert_eq!(store.read_latest("messages/empty").await.unwrap(), None);
    }
}
