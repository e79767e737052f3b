/// Derived unread flag
///
/// Unread is never stored; it is computed per conversation per viewer from
/// the viewer's lastSeen marker and the resolved preview. Own messages
/// never count as unread.
use crate::conversation::ConversationMeta;
use crate::preview::Preview;

/// True iff the preview carries a real message from someone else that the
/// viewer has not seen yet.
pub fn is_unread(meta: &ConversationMeta, preview: &Preview, viewer_id: &str) -> bool {
    let sender = match preview.sender_id.as_deref() {
        Some(s) if !s.is_empty() => s,
        _ => return false,
    };
    if preview.timestamp_ms == 0 || sender == viewer_id {
        return false;
    }
    match meta.last_seen_ms(viewer_id) {
        None => true,
        Some(seen) => seen < preview.timestamp_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn meta_with_last_seen(viewer: &str, seen: u64) -> ConversationMeta {
        let mut last_seen = HashMap::new();
        last_seen.insert(viewer.to_string(), json!(seen));
        ConversationMeta {
            last_seen,
            ..Default::default()
        }
    }

    fn preview(ts: u64, sender: Option<&str>) -> Preview {
        Preview {
            text: "hi".to_string(),
            timestamp_ms: ts,
            sender_id: sender.map(str::to_string),
        }
    }

    #[test]
    fn test_newer_message_from_other_is_unread() {
        let meta = meta_with_last_seen("me", 100);
        assert!(is_unread(&meta, &preview(150, Some("other")), "me"));
    }

    #[test]
    fn test_own_message_never_unread() {
        let meta = meta_with_last_seen("me", 100);
        assert!(!is_unread(&meta, &preview(150, Some("me")), "me"));
    }

    #[test]
    fn test_already_seen_not_unread() {
        let meta = meta_with_last_seen("me", 200);
        assert!(!is_unread(&meta, &preview(150, Some("other")), "me"));
    }

    #[test]
    fn test_no_last_seen_means_unread() {
        let meta = ConversationMeta::default();
        assert!(is_unread(&meta, &preview(150, Some("other")), "me"));
    }

    #[test]
    fn test_placeholder_preview_not_unread() {
        let meta = ConversationMeta::default();
        // timestamp 0 / no sender is the fresh-pairing placeholder
        assert!(!is_unread(&meta, &preview(0, Some("other")), "me"));
        assert!(!is_unread(&meta, &preview(150, None), "me"));
    }
}
