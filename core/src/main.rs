/// ChatSync demo - Two users chatting through an in-memory remote store
use chatsync_core::memory_store::MemoryStore;
use chatsync_core::{EngineConfig, SyncEngine};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let store = Arc::new(MemoryStore::new());
    let alice = SyncEngine::new("alice", store.clone(), EngineConfig::default());
    let bob = SyncEngine::new("bob", store.clone(), EngineConfig::default());

    let conversation = "dm:alice:bob";
    info!("🚀 Starting ChatSync demo");

    alice.open_conversation(conversation).await;
    bob.open_conversation(conversation).await;

    alice.send_message(conversation, "Hey Bob! 👋").await;
    bob.send_message(conversation, "Hi Alice, reconciliation works?").await;
    alice.send_message(conversation, "Seems so: 2 sources, 1 list").await;

    // Let the in-flight writes and snapshot broadcasts settle
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("\n── Rendered list as seen by bob ──");
    for msg in bob.rendered_messages(conversation).await {
        println!(
            "  [{:>13}] {:<5} {:?}: {}",
            msg.timestamp_ms, msg.sender_id, msg.status, msg.body
        );
    }

    bob.close_conversation(conversation).await;
    bob.watch_conversation(conversation).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let preview = bob.conversation_preview(conversation).await;
    println!("\n── List row for bob ──");
    println!(
        "  \"{}\" (ts {}, from {:?}, unread: {})",
        preview.text, preview.timestamp_ms, preview.sender_id, preview.unread
    );

    alice.shutdown().await;
    bob.shutdown().await;
    info!("Demo finished");
    Ok(())
}
