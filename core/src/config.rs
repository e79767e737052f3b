/// Engine configuration
use crate::obfuscate::DEFAULT_SHIFT;
use serde::{Deserialize, Serialize};

/// Tunables for the conversation sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rotation applied to message bodies at rest (obfuscation, not crypto)
    pub shift: u8,

    /// Preview line shown for a fresh pairing with no messages yet
    pub preview_placeholder: String,

    /// Container prefix for current-format per-conversation messages
    /// (`{prefix}/{conversation_id}/messages`)
    pub current_container_prefix: String,

    /// Container prefix for the legacy flat message history
    /// (`{prefix}/{conversation_id}`)
    pub legacy_container_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shift: DEFAULT_SHIFT,
            preview_placeholder: "No messages yet".to_string(),
            current_container_prefix: "conversations".to_string(),
            legacy_container_prefix: "messages".to_string(),
        }
    }
}
