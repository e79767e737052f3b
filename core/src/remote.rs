/// Abstract contracts for the remote store and live subscriptions
///
/// The engine never talks to a concrete backend; it consumes these traits.
/// The remote store is assumed to serialize writes and broadcast full
/// snapshots; conflict resolution is its problem, not ours. Transport-level
/// reconnection is likewise beneath this layer.
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Full enumeration of all message records under one conversation, in
/// remote delivery order: (record id, raw record). Always the complete
/// current set, never a delta.
pub type MessageSnapshot = Vec<(String, Value)>;

/// Timestamp fields written as JSON null ask the store to assign its own
/// clock ("server timestamp"). The engine never invents a committed
/// timestamp client-side.
pub const SERVER_TIMESTAMP: Value = Value::Null;

/// A live subscription handle: an explicit resource with deterministic
/// release. Dropping the handle (or calling `unsubscribe`) detaches the
/// remote callback immediately; nothing is left to ambient cleanup, which
/// is what keeps stale callbacks from mutating state for views no longer
/// on screen.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Explicit release; equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.cancel.is_some())
            .finish()
    }
}

/// Remote store collaborator: live ordered message streams, denormalized
/// conversation metadata, and bounded point reads.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Open a live subscription to a conversation's messages. The current
    /// full snapshot is delivered immediately, then again on every change.
    fn subscribe_messages(
        &self,
        conversation_id: &str,
        tx: mpsc::UnboundedSender<MessageSnapshot>,
    ) -> Subscription;

    /// Open a live subscription to the conversation's own metadata record.
    fn subscribe_conversation_meta(
        &self,
        conversation_id: &str,
        tx: mpsc::UnboundedSender<Value>,
    ) -> Subscription;

    /// Persist a new message record under a client-generated id.
    async fn write_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        record: Value,
    ) -> Result<()>;

    /// Merge a partial record into the conversation's metadata. Callers
    /// treat this as best-effort: failures are logged and ignored, never
    /// propagated to the sender.
    async fn update_conversation_meta(&self, conversation_id: &str, partial: Value) -> Result<()>;

    /// Point read of the single most-recent record under a container path,
    /// e.g. `conversations/{id}/messages` or the legacy `messages/{id}`.
    async fn read_latest(&self, container: &str) -> Result<Option<Value>>;
}
