//! ============================================================================
//! Database Types - Serializable records for the record store
//! ============================================================================
//! These are the persisted shapes. Sensitive fields are already encoded by
//! the protection codec: the transcript lives in `StoredTranscript`, memory
//! content is the (possibly encrypted) text.
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::protection::StoredTranscript;
use crate::types::{ExternalData, ProtectionLevel, Structured};

/// Conversation row as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub owner_id: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub structured: Structured,
    /// Encoded transcript, carrying its own protection level
    pub transcript: StoredTranscript,
    pub discarded: bool,
    pub language: String,
    pub source: String,
    pub external_data: Option<ExternalData>,
}

impl ConversationRecord {
    pub fn protection_level(&self) -> ProtectionLevel {
        self.transcript.protection_level
    }
}

/// Memory (fact) row as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub owner_id: String,
    pub conversation_id: Option<String>,
    /// Plain text for standard records, ciphertext for enhanced ones
    pub content: String,
    pub category: String,
    pub created_at: i64,
    pub protection_level: ProtectionLevel,
    pub reviewed: bool,
    pub deleted: bool,
}

/// Record store statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DbStats {
    pub total_conversations: usize,
    pub enhanced_conversations: usize,
    pub discarded_conversations: usize,
    pub total_memories: usize,
    pub owners: usize,
}
