// ============================================================================
// Record Store - Persistence for conversations and memories
// ============================================================================
// `RecordStore` is the narrow persistence interface; records are keyed by
// (owner_id, record_id) and hold already-encoded sensitive fields.
// `ConversationRepository` sits on top and runs the protection codec right
// before writes and right after reads.
// Backend: embedded redb file (default ~/.convo/records.redb) or memory.
// ============================================================================

mod memory_store;
mod redb_store;
mod repository;
pub mod types;

pub use memory_store::MemoryRecordStore;
pub use redb_store::RedbRecordStore;
pub use repository::{ConversationRepository, LoadedConversation, LoadedMemory};
pub use types::{ConversationRecord, DbStats, MemoryRecord};

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::{CoreConfig, RecordBackend};

/// Persistence collaborator. Implementations are synchronous; each call is a
/// single short transaction.
pub trait RecordStore: Send + Sync {
    // Conversations
    fn put_conversation(&self, record: &ConversationRecord) -> Result<()>;
    fn get_conversation(&self, owner_id: &str, id: &str) -> Result<Option<ConversationRecord>>;
    /// All conversations of one owner, newest first
    fn list_conversations(&self, owner_id: &str) -> Result<Vec<ConversationRecord>>;
    fn delete_conversation(&self, owner_id: &str, id: &str) -> Result<bool>;
    /// Soft delete. Returns false when the conversation does not exist.
    fn mark_discarded(&self, owner_id: &str, id: &str) -> Result<bool>;

    // Memories
    fn put_memory(&self, record: &MemoryRecord) -> Result<()>;
    fn get_memory(&self, owner_id: &str, id: &str) -> Result<Option<MemoryRecord>>;
    fn list_memories(&self, owner_id: &str) -> Result<Vec<MemoryRecord>>;
    fn delete_memory(&self, owner_id: &str, id: &str) -> Result<bool>;

    fn stats(&self) -> Result<DbStats>;
}

/// Open the record store selected by configuration
pub fn open_record_store(config: &CoreConfig) -> Result<Arc<dyn RecordStore>> {
    match &config.records {
        RecordBackend::Redb { path } => {
            let store = RedbRecordStore::open(path)?;
            Ok(Arc::new(store))
        }
        RecordBackend::Memory => {
            info!("Using in-memory record store");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
    }
}

/// Composite key "{owner_len}:{owner_id}:{id}". The length prefix keeps
/// owners containing ':' from colliding with ids containing ':'.
pub(crate) fn record_key(owner_id: &str, id: &str) -> String {
    format!("{}{}", owner_prefix(owner_id), id)
}

/// Key prefix shared by every record of one owner
pub(crate) fn owner_prefix(owner_id: &str) -> String {
    format!("{}:{}:", owner_id.len(), owner_id)
}

/// Newest first, ties by id so listings are stable
pub(crate) fn sort_newest_first(records: &mut [ConversationRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Aggregate statistics over full scans
pub(crate) fn compute_stats(conversations: &[ConversationRecord], memories: usize) -> DbStats {
    let owners: std::collections::HashSet<&str> =
        conversations.iter().map(|c| c.owner_id.as_str()).collect();

    DbStats {
        total_conversations: conversations.len(),
        enhanced_conversations: conversations
            .iter()
            .filter(|c| c.protection_level().is_encrypted())
            .count(),
        discarded_conversations: conversations.iter().filter(|c| c.discarded).count(),
        total_memories: memories,
        owners: owners.len(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::protection::StoredTranscript;
    use crate::types::{ProtectionLevel, Structured, TranscriptSegment};

    pub fn conversation_record(owner_id: &str, id: &str, created_at: i64) -> ConversationRecord {
        ConversationRecord {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            created_at,
            started_at: None,
            finished_at: None,
            structured: Structured {
                title: format!("Conversation {}", id),
                ..Default::default()
            },
            transcript: StoredTranscript::legacy(
                ProtectionLevel::Standard,
                vec![TranscriptSegment::new("hello", "SPEAKER_00", 0.0, 1.0)],
            ),
            discarded: false,
            language: "en".to_string(),
            source: "friend".to_string(),
            external_data: None,
        }
    }

    pub fn memory_record(owner_id: &str, id: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            conversation_id: None,
            content: "Likes hiking".to_string(),
            category: "interests".to_string(),
            created_at: 1_700_000_000,
            protection_level: ProtectionLevel::Standard,
            reviewed: false,
            deleted: false,
        }
    }

    /// Behavior every RecordStore must share
    pub fn exercise_store(store: &dyn RecordStore) {
        store.put_conversation(&conversation_record("alice", "c1", 100)).unwrap();
        store.put_conversation(&conversation_record("alice", "c2", 200)).unwrap();
        store.put_conversation(&conversation_record("bob", "c3", 150)).unwrap();

        let listed = store.list_conversations("alice").unwrap();
        let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);

        // Owner scoping
        assert!(store.get_conversation("bob", "c1").unwrap().is_none());
        assert!(store.get_conversation("alice", "c1").unwrap().is_some());

        // Overwrite
        let mut updated = conversation_record("alice", "c1", 100);
        updated.structured.title = "Renamed".to_string();
        store.put_conversation(&updated).unwrap();
        assert_eq!(
            store.get_conversation("alice", "c1").unwrap().unwrap().structured.title,
            "Renamed"
        );

        assert!(store.mark_discarded("alice", "c2").unwrap());
        assert!(!store.mark_discarded("alice", "missing").unwrap());
        assert!(store.get_conversation("alice", "c2").unwrap().unwrap().discarded);

        store.put_memory(&memory_record("alice", "m1")).unwrap();
        store.put_memory(&memory_record("bob", "m2")).unwrap();
        assert_eq!(store.list_memories("alice").unwrap().len(), 1);
        assert!(store.get_memory("alice", "m2").unwrap().is_none());

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_conversations, 3);
        assert_eq!(stats.discarded_conversations, 1);
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.owners, 2);

        assert!(store.delete_conversation("alice", "c1").unwrap());
        assert!(!store.delete_conversation("alice", "c1").unwrap());
        assert!(store.delete_memory("bob", "m2").unwrap());
        assert_eq!(store.stats().unwrap().total_conversations, 2);

        // Owner and id split differently around ':' stay distinct records
        store.put_conversation(&conversation_record("al:ice", "c2", 300)).unwrap();
        assert!(store.get_conversation("al", "ice:c2").unwrap().is_none());
        assert!(!store.delete_conversation("al", "ice:c2").unwrap());
        assert!(!store.mark_discarded("al", "ice:c2").unwrap());
        let kept = store.get_conversation("al:ice", "c2").unwrap().unwrap();
        assert_eq!(kept.owner_id, "al:ice");
        assert!(!kept.discarded);
        assert!(store.list_conversations("al").unwrap().is_empty());

        store.put_memory(&memory_record("al:ice", "m3")).unwrap();
        assert!(store.get_memory("al", "ice:m3").unwrap().is_none());
        assert!(!store.delete_memory("al", "ice:m3").unwrap());
        assert!(store.get_memory("al:ice", "m3").unwrap().is_some());
    }
}
