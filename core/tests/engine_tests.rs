/// End-to-end engine tests
/// Exercises the full loop against the in-memory remote store: optimistic
/// sends, snapshot reconciliation, previews, unread flags, and handle
/// teardown.
use chatsync_core::memory_store::MemoryStore;
use chatsync_core::obfuscate::{transform, DEFAULT_SHIFT};
use chatsync_core::{DeliveryStatus, EngineConfig, SyncEngine};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const CONV: &str = "dm:alice:bob";

// Long enough for spawned writes and snapshot broadcasts to settle.
const SETTLE: Duration = Duration::from_millis(150);

fn alice_and_bob(store: &Arc<MemoryStore>) -> (SyncEngine, SyncEngine) {
    (
        SyncEngine::new("alice", store.clone(), EngineConfig::default()),
        SyncEngine::new("bob", store.clone(), EngineConfig::default()),
    )
}

#[tokio::test]
async fn test_optimistic_send_superseded_by_remote_record() {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob) = alice_and_bob(&store);

    alice.open_conversation(CONV).await;
    bob.open_conversation(CONV).await;

    let ticket_id = alice.send_message(CONV, "Hello123!").await;

    // The ticket is visible immediately, before the write settles
    let optimistic = alice.rendered_messages(CONV).await;
    assert_eq!(optimistic.len(), 1);
    assert_eq!(optimistic[0].id, ticket_id);

    sleep(SETTLE).await;

    // Exactly one entry for the id, now sourced from the remote record
    let rendered = alice.rendered_messages(CONV).await;
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].id, ticket_id);
    assert_eq!(rendered[0].status, DeliveryStatus::Committed);
    assert_eq!(rendered[0].body, "Hello123!");
    assert!(rendered[0].timestamp_ms > 0, "server assigned a timestamp");

    // The recipient sees the same decoded message
    let received = bob.rendered_messages(CONV).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, "Hello123!");
    assert_eq!(received[0].sender_id, "alice");

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_failed_send_stays_visible() {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob) = alice_and_bob(&store);

    alice.open_conversation(CONV).await;
    store.fail_next_write();
    let doomed = alice.send_message(CONV, "will not make it").await;
    sleep(SETTLE).await;

    let rendered = alice.rendered_messages(CONV).await;
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].id, doomed);
    assert_eq!(rendered[0].status, DeliveryStatus::Failed);

    // A later snapshot from someone else must not silently remove it
    bob.open_conversation(CONV).await;
    bob.send_message(CONV, "unrelated").await;
    sleep(SETTLE).await;

    let rendered = alice.rendered_messages(CONV).await;
    assert_eq!(rendered.len(), 2);
    let failed = rendered.iter().find(|m| m.id == doomed).unwrap();
    assert_eq!(failed.status, DeliveryStatus::Failed);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_resorted_not_arrival_ordered() {
    let store = Arc::new(MemoryStore::new());
    let (alice, _) = alice_and_bob(&store);

    // Remote enumerates [500, 300] (already ms); the view must show [300, 500]
    store.seed_message(
        CONV,
        "m-500",
        json!({ "senderId": "bob", "text": transform("later", DEFAULT_SHIFT), "timestamp": 500 }),
    );
    store.seed_message(
        CONV,
        "m-300",
        json!({ "senderId": "bob", "text": transform("earlier", DEFAULT_SHIFT), "timestamp": 300 }),
    );

    alice.open_conversation(CONV).await;
    sleep(SETTLE).await;

    let rendered = alice.rendered_messages(CONV).await;
    let timestamps: Vec<u64> = rendered.iter().map(|m| m.timestamp_ms).collect();
    assert_eq!(timestamps, vec![300, 500]);

    alice.shutdown().await;
}

#[tokio::test]
async fn test_preview_prefers_highest_normalized_timestamp() {
    let store = Arc::new(MemoryStore::new());
    let (alice, _) = alice_and_bob(&store);

    // Legacy candidate at a seconds epoch, current-format candidate in ms.
    // Normalized legacy becomes 1_690_000_000_000; current still wins.
    store.seed_legacy_message(
        CONV,
        json!({
            "senderId": "bob",
            "text": transform("from the legacy container", DEFAULT_SHIFT),
            "timestamp": 1_690_000_000,
        }),
    );
    store.seed_message(
        CONV,
        "m-current",
        json!({
            "senderId": "bob",
            "text": transform("from the current container", DEFAULT_SHIFT),
            "timestamp": 1_690_000_500_000u64,
        }),
    );

    let preview = alice.conversation_preview(CONV).await;
    assert_eq!(preview.text, "from the current container");
    assert_eq!(preview.timestamp_ms, 1_690_000_500_000);
    assert_eq!(preview.sender_id.as_deref(), Some("bob"));

    alice.shutdown().await;
}

#[tokio::test]
async fn test_preview_placeholder_for_fresh_pairing() {
    let store = Arc::new(MemoryStore::new());
    let (alice, _) = alice_and_bob(&store);

    let preview = alice.conversation_preview(CONV).await;
    assert_eq!(preview.text, "No messages yet");
    assert_eq!(preview.timestamp_ms, 0);
    assert_eq!(preview.sender_id, None);
    assert!(!preview.unread);

    alice.shutdown().await;
}

#[tokio::test]
async fn test_unread_set_and_cleared_by_opening() {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob) = alice_and_bob(&store);

    bob.watch_conversation(CONV).await;

    alice.open_conversation(CONV).await;
    alice.send_message(CONV, "new message for bob").await;
    sleep(SETTLE).await;

    // Unread for the recipient, never for the sender
    let for_bob = bob.conversation_preview(CONV).await;
    assert!(for_bob.unread);
    let for_alice = alice.conversation_preview(CONV).await;
    assert!(!for_alice.unread);

    bob.mark_opened(CONV).await;
    sleep(SETTLE).await;

    let for_bob = bob.conversation_preview(CONV).await;
    assert!(!for_bob.unread);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_meta_write_failure_never_fails_the_send() {
    let store = Arc::new(MemoryStore::new());
    let (alice, _) = alice_and_bob(&store);

    alice.open_conversation(CONV).await;
    store.fail_meta_writes(true);
    let ticket_id = alice.send_message(CONV, "still goes through").await;
    sleep(SETTLE).await;

    let rendered = alice.rendered_messages(CONV).await;
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].id, ticket_id);
    assert_eq!(rendered[0].status, DeliveryStatus::Committed);

    alice.shutdown().await;
}

#[tokio::test]
async fn test_close_releases_handles_deterministically() {
    let store = Arc::new(MemoryStore::new());
    let (alice, _) = alice_and_bob(&store);

    alice.open_conversation(CONV).await;
    assert_eq!(store.message_subscriber_count(CONV), 1);
    assert_eq!(store.meta_subscriber_count(CONV), 1);

    alice.close_conversation(CONV).await;
    assert_eq!(store.message_subscriber_count(CONV), 0);
    assert_eq!(store.meta_subscriber_count(CONV), 0);
    assert!(alice.rendered_messages(CONV).await.is_empty());

    alice.watch_conversation(CONV).await;
    assert_eq!(store.meta_subscriber_count(CONV), 1);
    alice.unwatch_conversation(CONV).await;
    assert_eq!(store.meta_subscriber_count(CONV), 0);
}

#[tokio::test]
async fn test_queue_survives_close_and_reopen() {
    let store = Arc::new(MemoryStore::new());
    let (alice, _) = alice_and_bob(&store);

    alice.open_conversation(CONV).await;
    store.fail_next_write();
    let doomed = alice.send_message(CONV, "failed while closing").await;
    sleep(SETTLE).await;

    // View teardown does not cancel or discard the settled ticket
    alice.close_conversation(CONV).await;
    alice.open_conversation(CONV).await;
    sleep(SETTLE).await;

    let rendered = alice.rendered_messages(CONV).await;
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].id, doomed);
    assert_eq!(rendered[0].status, DeliveryStatus::Failed);

    alice.shutdown().await;
}

#[tokio::test]
async fn test_send_to_unopened_conversation_renders_nothing() {
    let store = Arc::new(MemoryStore::new());
    let (alice, _) = alice_and_bob(&store);

    // Never opened: the ticket is queued but no rendered entry appears
    let ticket_id = alice.send_message(CONV, "sent from a list row").await;
    assert!(alice.rendered_messages(CONV).await.is_empty());
    sleep(SETTLE).await;
    assert!(alice.rendered_messages(CONV).await.is_empty());

    // Opening later shows the message, committed by the settled write
    alice.open_conversation(CONV).await;
    sleep(SETTLE).await;
    let rendered = alice.rendered_messages(CONV).await;
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].id, ticket_id);
    assert_eq!(rendered[0].status, DeliveryStatus::Committed);

    alice.shutdown().await;
}

#[tokio::test]
async fn test_late_write_failure_does_not_resurrect_closed_view() {
    let store = Arc::new(MemoryStore::new());
    let (alice, _) = alice_and_bob(&store);

    alice.open_conversation(CONV).await;
    store.fail_next_write();
    let doomed = alice.send_message(CONV, "fails after teardown").await;

    // Close before the write settles; the failure lands against a closed view
    alice.close_conversation(CONV).await;
    sleep(SETTLE).await;
    assert!(alice.rendered_messages(CONV).await.is_empty());

    // The Failed ticket is still in the queue and shows up on reopen
    alice.open_conversation(CONV).await;
    sleep(SETTLE).await;
    let rendered = alice.rendered_messages(CONV).await;
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].id, doomed);
    assert_eq!(rendered[0].status, DeliveryStatus::Failed);

    alice.shutdown().await;
}

#[tokio::test]
async fn test_reopening_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let (alice, _) = alice_and_bob(&store);

    alice.open_conversation(CONV).await;
    alice.open_conversation(CONV).await;
    // Still exactly one live subscription of each kind
    assert_eq!(store.message_subscriber_count(CONV), 1);
    assert_eq!(store.meta_subscriber_count(CONV), 1);

    alice.shutdown().await;
    assert_eq!(store.message_subscriber_count(CONV), 0);
    assert_eq!(store.meta_subscriber_count(CONV), 0);
}
