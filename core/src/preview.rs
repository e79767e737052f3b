/// Conversation preview resolver for list views
///
/// List views show one line per conversation without opening a live message
/// subscription each. The resolver picks the best candidate across the
/// denormalized metadata and two message-history fallbacks using bounded
/// point reads only.
use crate::config::EngineConfig;
use crate::conversation::ConversationMeta;
use crate::message::parse_message;
use crate::obfuscate;
use crate::remote::RemoteStore;
use crate::time::normalize_timestamp;
use serde_json::Value;
use tracing::warn;

/// Resolved preview line for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub text: String,
    pub timestamp_ms: u64,
    pub sender_id: Option<String>,
}

/// Pick the best preview: highest normalized timestamp among
///   A) the conversation's own denormalized preview fields,
///   B) the newest record in the current-format message container,
///   C) the newest record in the legacy flat container.
/// Candidates with empty text never win. If nothing yields text, the
/// configured placeholder marks a fresh pairing. A failing point read is
/// logged and skipped; the preview degrades instead of erroring.
pub async fn resolve_preview(
    remote: &dyn RemoteStore,
    config: &EngineConfig,
    conversation_id: &str,
    meta: &ConversationMeta,
) -> Preview {
    let mut candidates: Vec<Preview> = Vec::new();

    if let Some(stored) = meta.last_message_text.as_deref() {
        if !stored.is_empty() {
            candidates.push(Preview {
                text: obfuscate::untransform(stored, config.shift),
                timestamp_ms: normalize_timestamp(meta.last_message_timestamp.as_ref()),
                sender_id: meta.last_message_sender_id.clone(),
            });
        }
    }

    let current = format!(
        "{}/{}/messages",
        config.current_container_prefix, conversation_id
    );
    if let Some(p) = latest_candidate(remote, &current, conversation_id, config.shift).await {
        candidates.push(p);
    }

    let legacy = format!("{}/{}", config.legacy_container_prefix, conversation_id);
    if let Some(p) = latest_candidate(remote, &legacy, conversation_id, config.shift).await {
        candidates.push(p);
    }

    candidates
        .into_iter()
        .filter(|c| !c.text.is_empty())
        .max_by_key(|c| c.timestamp_ms)
        .unwrap_or_else(|| Preview {
            text: config.preview_placeholder.clone(),
            timestamp_ms: 0,
            sender_id: None,
        })
}

async fn latest_candidate(
    remote: &dyn RemoteStore,
    container: &str,
    conversation_id: &str,
    shift: u8,
) -> Option<Preview> {
    let raw = match remote.read_latest(container).await {
        Ok(raw) => raw?,
        Err(e) => {
            warn!("Preview point-read of {} failed (skipped): {}", container, e);
            return None;
        }
    };
    candidate_from_record(&raw, conversation_id, shift)
}

fn candidate_from_record(raw: &Value, conversation_id: &str, shift: u8) -> Option<Preview> {
    // Record ids are irrelevant to a preview line; reuse the parser for
    // field probing, decoding and normalization.
    let msg = parse_message("preview", conversation_id, raw, shift)?;
    Some(Preview {
        text: msg.body,
        timestamp_ms: msg.timestamp_ms,
        sender_id: Some(msg.sender_id),
    })
}
