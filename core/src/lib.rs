/// ChatSync - Conversation Synchronization Engine
///
/// Keeps a one-to-one conversation's rendered message list, list preview,
/// and unread flag consistent while a live remote snapshot stream and a
/// local optimistic send queue race each other.

pub mod error;
pub mod config;
pub mod time;
pub mod obfuscate;
pub mod message;
pub mod conversation;
pub mod outbox;
pub mod reconcile;
pub mod preview;
pub mod unread;
pub mod remote;
pub mod memory_store;
pub mod engine;

pub use config::EngineConfig;
pub use engine::{PreviewWithUnread, SyncEngine};
pub use error::{Result, SyncError};
pub use message::{DeliveryStatus, Message};
