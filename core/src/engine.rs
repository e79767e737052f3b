/// Conversation synchronization engine
///
/// Owns the moving parts per conversation: the live message subscription,
/// the optimistic send queue, and the latest rendered list. Re-renders on
/// every remote snapshot and on every queue mutation; both paths go through
/// the same pure merge so back-to-back invocations are safe.
use crate::config::EngineConfig;
use crate::conversation::ConversationMeta;
use crate::message::Message;
use crate::obfuscate;
use crate::outbox::SendQueue;
use crate::preview::resolve_preview;
use crate::reconcile;
use crate::remote::{MessageSnapshot, RemoteStore, Subscription, SERVER_TIMESTAMP};
use crate::time::now_ms;
use crate::unread::is_unread;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Preview line plus the current viewer's unread flag, for list rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewWithUnread {
    pub text: String,
    pub timestamp_ms: u64,
    pub sender_id: Option<String>,
    pub unread: bool,
}

// Live handles for one open conversation view: the message stream plus an
// independent metadata subscription, each with its own pump task.
struct OpenConversation {
    message_sub: Subscription,
    message_pump: JoinHandle<()>,
    meta_sub: Subscription,
    meta_pump: JoinHandle<()>,
}

// A list-view metadata watch for one visible conversation.
struct MetaWatch {
    sub: Subscription,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct EngineState {
    /// Latest rendered list per open conversation, replaced wholesale on
    /// every snapshot or queue mutation. No partial state is observable.
    rendered: HashMap<String, Vec<Message>>,

    /// Last parsed authoritative committed set per open conversation.
    /// Discarded on close; the next open starts from the fresh snapshot.
    remote_committed: HashMap<String, Vec<Message>>,

    /// Per-conversation send queues. Queues survive close/reopen so a write
    /// that settles after view teardown still resolves its ticket.
    queues: HashMap<String, SendQueue>,

    /// Latest known metadata per subscribed conversation.
    meta_cache: HashMap<String, ConversationMeta>,

    open: HashMap<String, OpenConversation>,
    meta_watches: HashMap<String, MetaWatch>,
}

/// Cheaply cloneable handle; all clones share the same state.
#[derive(Clone)]
pub struct SyncEngine {
    current_user_id: String,
    config: Arc<EngineConfig>,
    remote: Arc<dyn RemoteStore>,
    state: Arc<RwLock<EngineState>>,
}

impl SyncEngine {
    pub fn new(
        current_user_id: impl Into<String>,
        remote: Arc<dyn RemoteStore>,
        config: EngineConfig,
    ) -> Self {
        let current_user_id = current_user_id.into();
        info!("Sync engine created for user {}", current_user_id);
        Self {
            current_user_id,
            config: Arc::new(config),
            remote,
            state: Arc::new(RwLock::new(EngineState::default())),
        }
    }

    pub fn current_user_id(&self) -> &str {
        &self.current_user_id
    }

    // ─── Open conversation views ─────────────────────────────────────────────

    /// Open a conversation: one live message subscription plus an
    /// independent metadata subscription, both torn down by
    /// `close_conversation`. Re-opening an already-open conversation only
    /// refreshes the viewer's lastSeen marker.
    pub async fn open_conversation(&self, conversation_id: &str) {
        {
            let mut state = self.state.write().await;
            if !state.open.contains_key(conversation_id) {
                let (msg_tx, msg_rx) = mpsc::unbounded_channel();
                let message_sub = self.remote.subscribe_messages(conversation_id, msg_tx);
                let message_pump = tokio::spawn(pump_snapshots(
                    self.clone(),
                    conversation_id.to_string(),
                    msg_rx,
                ));

                let (meta_tx, meta_rx) = mpsc::unbounded_channel();
                let meta_sub = self
                    .remote
                    .subscribe_conversation_meta(conversation_id, meta_tx);
                let meta_pump = tokio::spawn(pump_meta(
                    self.clone(),
                    conversation_id.to_string(),
                    meta_rx,
                ));

                state.open.insert(
                    conversation_id.to_string(),
                    OpenConversation {
                        message_sub,
                        message_pump,
                        meta_sub,
                        meta_pump,
                    },
                );

                // Until the first snapshot lands, the view shows whatever
                // the send queue already holds.
                state.queues.entry(conversation_id.to_string()).or_default();
                rerender_locked(&mut state, conversation_id);
                debug!("Opened conversation {}", conversation_id);
            }
        }
        self.mark_opened(conversation_id).await;
    }

    /// Tear down an open conversation deterministically: unsubscribe both
    /// handles, stop both pumps, and discard the reconciliation state. The
    /// send queue is kept: in-flight sends are not cancelled by a view
    /// teardown and settle when the conversation is reopened.
    pub async fn close_conversation(&self, conversation_id: &str) {
        let mut state = self.state.write().await;
        if let Some(open) = state.open.remove(conversation_id) {
            open.message_pump.abort();
            open.meta_pump.abort();
            open.message_sub.unsubscribe();
            open.meta_sub.unsubscribe();
            state.rendered.remove(conversation_id);
            state.remote_committed.remove(conversation_id);
            if !state.meta_watches.contains_key(conversation_id) {
                state.meta_cache.remove(conversation_id);
            }
            debug!("Closed conversation {}", conversation_id);
        }
    }

    /// The current ordered, duplicate-free list for an open conversation.
    /// Empty if the conversation is not open.
    pub async fn rendered_messages(&self, conversation_id: &str) -> Vec<Message> {
        let state = self.state.read().await;
        state
            .rendered
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    // ─── Sending ─────────────────────────────────────────────────────────────

    /// Optimistic send: the Pending ticket is in the rendered list before
    /// the write settles. Returns the ticket id (also the eventual remote
    /// record id). Fire-and-forget; progress shows up in the rendered list.
    pub async fn send_message(&self, conversation_id: &str, body_plaintext: &str) -> String {
        let ticket = {
            let mut state = self.state.write().await;
            let ticket = {
                let queue = state.queues.entry(conversation_id.to_string()).or_default();
                queue.enqueue(conversation_id, &self.current_user_id, body_plaintext)
            };
            rerender_locked(&mut state, conversation_id);
            ticket
        };

        let ticket_id = ticket.message.id.clone();
        let transformed = obfuscate::transform(body_plaintext, self.config.shift);
        let record = json!({
            "senderId": self.current_user_id,
            "text": transformed,
            "timestamp": SERVER_TIMESTAMP,
        });

        let engine = self.clone();
        let conversation_id = conversation_id.to_string();
        let id_for_write = ticket_id.clone();
        tokio::spawn(async move {
            match engine
                .remote
                .write_message(&conversation_id, &id_for_write, record)
                .await
            {
                Ok(()) => {
                    debug!("Send {} committed to remote", id_for_write);
                    engine.spawn_preview_update(&conversation_id, &transformed);
                }
                Err(e) => {
                    error!("Send {} failed: {}", id_for_write, e);
                    let mut state = engine.state.write().await;
                    if let Some(queue) = state.queues.get_mut(&conversation_id) {
                        queue.mark_failed(&id_for_write);
                    }
                    rerender_locked(&mut state, &conversation_id);
                }
            }
        });

        ticket_id
    }

    // Best-effort secondary write, decoupled from the send's result channel:
    // a preview hiccup never blocks or reverses a visible send success.
    fn spawn_preview_update(&self, conversation_id: &str, transformed_body: &str) {
        let remote = Arc::clone(&self.remote);
        let conversation_id = conversation_id.to_string();
        let partial = json!({
            "lastMessageText": transformed_body,
            "lastMessageTimestamp": SERVER_TIMESTAMP,
            "lastMessageSenderId": self.current_user_id,
        });
        tokio::spawn(async move {
            if let Err(e) = remote
                .update_conversation_meta(&conversation_id, partial)
                .await
            {
                warn!(
                    "Preview update for {} failed (ignored): {}",
                    conversation_id, e
                );
            }
        });
    }

    // ─── List views ──────────────────────────────────────────────────────────

    /// Watch a conversation's metadata for a list view: one subscription
    /// per visible conversation, recorded in an explicit handle map.
    pub async fn watch_conversation(&self, conversation_id: &str) {
        let mut state = self.state.write().await;
        if state.meta_watches.contains_key(conversation_id) {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.remote.subscribe_conversation_meta(conversation_id, tx);
        let pump = tokio::spawn(pump_meta(self.clone(), conversation_id.to_string(), rx));
        state
            .meta_watches
            .insert(conversation_id.to_string(), MetaWatch { sub, pump });
        debug!("Watching conversation {}", conversation_id);
    }

    /// Release the list-view watch when the conversation leaves the visible
    /// set. Deterministic: the handle is unsubscribed here, not whenever a
    /// collector gets around to it.
    pub async fn unwatch_conversation(&self, conversation_id: &str) {
        let mut state = self.state.write().await;
        if let Some(watch) = state.meta_watches.remove(conversation_id) {
            watch.pump.abort();
            watch.sub.unsubscribe();
            if !state.open.contains_key(conversation_id) {
                state.meta_cache.remove(conversation_id);
            }
            debug!("Stopped watching conversation {}", conversation_id);
        }
    }

    /// Resolve the preview line plus the viewer's unread flag. Bounded
    /// point reads only; no live subscription is opened here.
    ///
    /// The unread flag is derived from the cached metadata, which is
    /// populated by an open or watched conversation's subscription. Call
    /// `watch_conversation` (as a list view does) before relying on the
    /// flag; with no cached metadata the viewer's lastSeen is unknown and
    /// unread over-reports.
    pub async fn conversation_preview(&self, conversation_id: &str) -> PreviewWithUnread {
        let meta = {
            let state = self.state.read().await;
            state
                .meta_cache
                .get(conversation_id)
                .cloned()
                .unwrap_or_default()
        };
        let preview = resolve_preview(
            self.remote.as_ref(),
            &self.config,
            conversation_id,
            &meta,
        )
        .await;
        let unread = is_unread(&meta, &preview, &self.current_user_id);
        PreviewWithUnread {
            text: preview.text,
            timestamp_ms: preview.timestamp_ms,
            sender_id: preview.sender_id,
            unread,
        }
    }

    // ─── Unread ──────────────────────────────────────────────────────────────

    /// Record that the viewer has the conversation on screen now. Clears
    /// unread until a newer message from someone else arrives. lastSeen is
    /// monotone: an older marker is never written over a newer one.
    pub async fn mark_opened(&self, conversation_id: &str) {
        let now = now_ms();
        {
            let state = self.state.read().await;
            if let Some(meta) = state.meta_cache.get(conversation_id) {
                if meta
                    .last_seen_ms(&self.current_user_id)
                    .is_some_and(|seen| seen >= now)
                {
                    return;
                }
            }
        }

        let mut last_seen = Map::new();
        last_seen.insert(self.current_user_id.clone(), Value::from(now));
        let partial = json!({ "lastSeen": last_seen });

        // Best-effort like every metadata write
        if let Err(e) = self
            .remote
            .update_conversation_meta(conversation_id, partial)
            .await
        {
            warn!(
                "lastSeen update for {} failed (ignored): {}",
                conversation_id, e
            );
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Release every live handle and stop every pump task.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        for (_, open) in state.open.drain() {
            open.message_pump.abort();
            open.meta_pump.abort();
            open.message_sub.unsubscribe();
            open.meta_sub.unsubscribe();
        }
        for (_, watch) in state.meta_watches.drain() {
            watch.pump.abort();
            watch.sub.unsubscribe();
        }
        state.rendered.clear();
        state.remote_committed.clear();
        state.meta_cache.clear();
        state.queues.clear();
        info!("Sync engine for {} shut down", self.current_user_id);
    }

    // Applied on every snapshot delivery: parse, reconcile, re-render.
    async fn apply_snapshot(&self, conversation_id: &str, snapshot: MessageSnapshot) {
        let parsed = reconcile::parse_snapshot(conversation_id, &snapshot, self.config.shift);
        let mut state = self.state.write().await;
        state
            .remote_committed
            .insert(conversation_id.to_string(), parsed);
        rerender_locked(&mut state, conversation_id);
    }
}

// Re-render from the retained authoritative set plus the current queue,
// replacing the previous list atomically under the state lock. The queue
// mutation (ticket settlement) always runs; rendered state exists only for
// open conversations, so a send or late write settling against a closed
// view never resurrects its list.
fn rerender_locked(state: &mut EngineState, conversation_id: &str) {
    let parsed = state
        .remote_committed
        .get(conversation_id)
        .cloned()
        .unwrap_or_default();
    let list = {
        let queue = state.queues.entry(conversation_id.to_string()).or_default();
        reconcile::render(parsed, queue)
    };
    if state.open.contains_key(conversation_id) {
        state.rendered.insert(conversation_id.to_string(), list);
    }
}

async fn pump_snapshots(
    engine: SyncEngine,
    conversation_id: String,
    mut rx: mpsc::UnboundedReceiver<MessageSnapshot>,
) {
    while let Some(snapshot) = rx.recv().await {
        engine.apply_snapshot(&conversation_id, snapshot).await;
    }
    debug!("Message stream for {} ended", conversation_id);
}

async fn pump_meta(
    engine: SyncEngine,
    conversation_id: String,
    mut rx: mpsc::UnboundedReceiver<Value>,
) {
    while let Some(raw) = rx.recv().await {
        let meta = ConversationMeta::from_value(&raw);
        let mut state = engine.state.write().await;
        state.meta_cache.insert(conversation_id.clone(), meta);
    }
    debug!("Meta stream for {} ended", conversation_id);
}
