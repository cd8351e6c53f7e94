//! ============================================================================
//! ConversationRepository - Codec-aware access to the record store
//! ============================================================================
//! Encodes transcripts and protected text right before a write and decodes
//! them right after a read. Reads never fail on undecodable payloads: the
//! anomaly is reported next to the record instead.
//! ============================================================================

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{ConversationRecord, MemoryRecord};
use super::RecordStore;
use crate::protection::{DecodeAnomaly, ProtectionCodec, TextOutcome};
use crate::types::{Conversation, MemoryFact, ProtectionLevel};

/// A conversation read back from storage
#[derive(Debug, Clone)]
pub struct LoadedConversation {
    pub conversation: Conversation,
    /// Set when the transcript was passed through undecoded. Legacy
    /// plaintext segments are still recovered; opaque blobs leave the
    /// transcript empty.
    pub anomaly: Option<DecodeAnomaly>,
}

#[derive(Debug, Clone)]
pub struct LoadedMemory {
    pub memory: MemoryFact,
    pub anomaly: Option<DecodeAnomaly>,
}

#[derive(Clone)]
pub struct ConversationRepository {
    store: Arc<dyn RecordStore>,
    codec: ProtectionCodec,
}

impl ConversationRepository {
    pub fn new(store: Arc<dyn RecordStore>, codec: ProtectionCodec) -> Self {
        Self { store, codec }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn codec(&self) -> &ProtectionCodec {
        &self.codec
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    /// Encode and store a conversation. An empty transcript never replaces a
    /// stored transcript that could not be decoded: a passed-through load
    /// carries no segments, and saving it back would erase the ciphertext.
    pub fn save(&self, conversation: &Conversation) -> Result<()> {
        if conversation.transcript_segments.is_empty() {
            if let Some(existing) = self
                .store
                .get_conversation(&conversation.owner_id, &conversation.id)?
            {
                if self.codec.is_opaque(&existing.transcript, &existing.owner_id) {
                    return Err(anyhow!(
                        "Refusing to overwrite undecodable transcript of conversation {}",
                        conversation.id
                    ));
                }
            }
        }

        let transcript = self.codec.encode(
            &conversation.transcript_segments,
            &conversation.owner_id,
            conversation.protection_level,
        )?;

        let record = ConversationRecord {
            id: conversation.id.clone(),
            owner_id: conversation.owner_id.clone(),
            created_at: conversation.created_at,
            started_at: conversation.started_at,
            finished_at: conversation.finished_at,
            structured: conversation.structured.clone(),
            transcript,
            discarded: conversation.discarded,
            language: conversation.language.clone(),
            source: conversation.source.clone(),
            external_data: conversation.external_data.clone(),
        };

        self.store.put_conversation(&record)?;
        debug!(
            "Saved conversation {} ({})",
            conversation.id, conversation.protection_level
        );
        Ok(())
    }

    pub fn load(&self, owner_id: &str, id: &str) -> Result<Option<LoadedConversation>> {
        Ok(self
            .store
            .get_conversation(owner_id, id)?
            .map(|record| self.decode_record(record)))
    }

    /// Like `load`, but a missing conversation is an error
    pub fn require(&self, owner_id: &str, id: &str) -> Result<LoadedConversation> {
        self.load(owner_id, id)?
            .ok_or_else(|| anyhow!("Conversation not found: {}", id))
    }

    /// Decoded conversations of one owner, newest first
    pub fn list(&self, owner_id: &str, include_discarded: bool) -> Result<Vec<LoadedConversation>> {
        Ok(self
            .store
            .list_conversations(owner_id)?
            .into_iter()
            .filter(|r| include_discarded || !r.discarded)
            .map(|record| self.decode_record(record))
            .collect())
    }

    pub fn delete(&self, owner_id: &str, id: &str) -> Result<bool> {
        self.store.delete_conversation(owner_id, id)
    }

    pub fn mark_discarded(&self, owner_id: &str, id: &str) -> Result<bool> {
        self.store.mark_discarded(owner_id, id)
    }

    /// Re-encode a conversation under a new protection level. Refuses when
    /// the current transcript cannot be decoded, so nothing is lost.
    pub fn set_protection_level(&self, owner_id: &str, id: &str, level: ProtectionLevel) -> Result<bool> {
        let Some(loaded) = self.load(owner_id, id)? else {
            return Ok(false);
        };

        if let Some(anomaly) = loaded.anomaly {
            if loaded.conversation.transcript_segments.is_empty() {
                return Err(anyhow!(
                    "Cannot migrate conversation {}: transcript undecodable ({})",
                    id,
                    anomaly
                ));
            }
        }

        let conversation = loaded.conversation.with_protection(level);
        self.save(&conversation)?;
        info!("Migrated conversation {} to {} protection", id, level);
        Ok(true)
    }

    fn decode_record(&self, record: ConversationRecord) -> LoadedConversation {
        let outcome = self.codec.decode(&record.transcript, &record.owner_id);
        let anomaly = outcome.anomaly();
        let segments = outcome.into_segments().unwrap_or_default();

        LoadedConversation {
            conversation: Conversation {
                id: record.id,
                owner_id: record.owner_id,
                created_at: record.created_at,
                started_at: record.started_at,
                finished_at: record.finished_at,
                structured: record.structured,
                transcript_segments: segments,
                protection_level: record.transcript.protection_level,
                discarded: record.discarded,
                language: record.language,
                source: record.source,
                external_data: record.external_data,
            },
            anomaly,
        }
    }

    // ========================================================================
    // Memories
    // ========================================================================

    pub fn save_memory(&self, memory: &MemoryFact) -> Result<()> {
        let content = self
            .codec
            .encode_text(&memory.content, &memory.owner_id, memory.protection_level)?;

        let record = MemoryRecord {
            id: memory.id.clone(),
            owner_id: memory.owner_id.clone(),
            conversation_id: memory.conversation_id.clone(),
            content,
            category: memory.category.clone(),
            created_at: memory.created_at,
            protection_level: memory.protection_level,
            reviewed: memory.reviewed,
            deleted: memory.deleted,
        };
        self.store.put_memory(&record)
    }

    pub fn load_memory(&self, owner_id: &str, id: &str) -> Result<Option<LoadedMemory>> {
        Ok(self
            .store
            .get_memory(owner_id, id)?
            .map(|record| self.decode_memory(record)))
    }

    pub fn list_memories(&self, owner_id: &str) -> Result<Vec<LoadedMemory>> {
        Ok(self
            .store
            .list_memories(owner_id)?
            .into_iter()
            .filter(|r| !r.deleted)
            .map(|record| self.decode_memory(record))
            .collect())
    }

    pub fn delete_memory(&self, owner_id: &str, id: &str) -> Result<bool> {
        self.store.delete_memory(owner_id, id)
    }

    fn decode_memory(&self, record: MemoryRecord) -> LoadedMemory {
        let (content, anomaly) =
            match self
                .codec
                .decode_text(&record.content, &record.owner_id, record.protection_level)
            {
                TextOutcome::Decoded(text) => (text, None),
                TextOutcome::PassedThrough { text, anomaly } => (text, Some(anomaly)),
            };

        LoadedMemory {
            memory: MemoryFact {
                id: record.id,
                owner_id: record.owner_id,
                conversation_id: record.conversation_id,
                content,
                category: record.category,
                created_at: record.created_at,
                protection_level: record.protection_level,
                reviewed: record.reviewed,
                deleted: record.deleted,
            },
            anomaly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRecordStore;
    use crate::protection::{StoredPayload, StoredTranscript};
    use crate::types::TranscriptSegment;

    const SECRET: &str = "repository-test-secret-0123456789abcdef";

    fn repository() -> ConversationRepository {
        ConversationRepository::new(
            Arc::new(MemoryRecordStore::new()),
            ProtectionCodec::new(SECRET).unwrap(),
        )
    }

    fn conversation(level: ProtectionLevel) -> Conversation {
        Conversation::new(
            "alice",
            vec![
                TranscriptSegment::new("Morning standup notes", "SPEAKER_00", 0.0, 4.0),
                TranscriptSegment::new("Ship it on Friday", "SPEAKER_01", 4.0, 7.5),
            ],
        )
        .with_protection(level)
    }

    #[test]
    fn test_enhanced_transcript_is_encrypted_at_rest() {
        let repo = repository();
        let conversation = conversation(ProtectionLevel::Enhanced);
        repo.save(&conversation).unwrap();

        let raw = repo
            .store()
            .get_conversation("alice", &conversation.id)
            .unwrap()
            .unwrap();
        let StoredPayload::Blob(blob) = &raw.transcript.payload else {
            panic!("expected encoded blob");
        };
        assert!(!blob.contains("standup"));
        assert!(hex::decode(blob).is_err());

        let loaded = repo.require("alice", &conversation.id).unwrap();
        assert!(loaded.anomaly.is_none());
        assert_eq!(loaded.conversation, conversation);
    }

    #[test]
    fn test_legacy_record_is_readable() {
        let repo = repository();
        let mut record = {
            let c = conversation(ProtectionLevel::Standard);
            repo.save(&c).unwrap();
            repo.store().get_conversation("alice", &c.id).unwrap().unwrap()
        };
        record.transcript = StoredTranscript::legacy(
            ProtectionLevel::Enhanced,
            vec![TranscriptSegment::new("old data", "SPEAKER_00", 0.0, 1.0)],
        );
        repo.store().put_conversation(&record).unwrap();

        let loaded = repo.require("alice", &record.id).unwrap();
        assert_eq!(loaded.anomaly, Some(DecodeAnomaly::NotEncrypted));
        assert_eq!(loaded.conversation.transcript_segments[0].text, "old data");
        assert_eq!(repo.codec().diagnostics().not_encrypted, 1);
    }

    #[test]
    fn test_set_protection_level() {
        let repo = repository();
        let conversation = conversation(ProtectionLevel::Standard);
        repo.save(&conversation).unwrap();

        assert!(repo
            .set_protection_level("alice", &conversation.id, ProtectionLevel::Enhanced)
            .unwrap());
        let raw = repo
            .store()
            .get_conversation("alice", &conversation.id)
            .unwrap()
            .unwrap();
        assert_eq!(raw.protection_level(), ProtectionLevel::Enhanced);

        let loaded = repo.require("alice", &conversation.id).unwrap();
        assert_eq!(loaded.conversation.transcript_segments, conversation.transcript_segments);

        assert!(!repo
            .set_protection_level("alice", "missing", ProtectionLevel::Standard)
            .unwrap());
    }

    #[test]
    fn test_save_keeps_undecodable_transcript() {
        let repo = repository();
        let conversation = conversation(ProtectionLevel::Enhanced);
        repo.save(&conversation).unwrap();

        // Same record read through a codec holding a different secret
        let other = ConversationRepository::new(
            repo.store().clone(),
            ProtectionCodec::new("some-other-secret-0123456789abcdef").unwrap(),
        );
        let loaded = other.require("alice", &conversation.id).unwrap();
        assert_eq!(loaded.anomaly, Some(DecodeAnomaly::Decrypt));
        assert!(loaded.conversation.transcript_segments.is_empty());

        let before = repo
            .store()
            .get_conversation("alice", &conversation.id)
            .unwrap()
            .unwrap()
            .transcript;
        assert!(other.save(&loaded.conversation).is_err());
        let after = repo
            .store()
            .get_conversation("alice", &conversation.id)
            .unwrap()
            .unwrap()
            .transcript;
        assert_eq!(before, after);

        // The owning codec still decodes it
        let intact = repo.require("alice", &conversation.id).unwrap();
        assert_eq!(intact.conversation.transcript_segments, conversation.transcript_segments);

        // Decodable records may still be emptied on purpose
        let mut emptied = intact.conversation;
        emptied.transcript_segments.clear();
        repo.save(&emptied).unwrap();
        assert!(repo
            .require("alice", &conversation.id)
            .unwrap()
            .conversation
            .transcript_segments
            .is_empty());
    }

    #[test]
    fn test_list_skips_discarded() {
        let repo = repository();
        let keep = conversation(ProtectionLevel::Standard).with_created_at(10);
        let drop = conversation(ProtectionLevel::Enhanced).with_created_at(20);
        repo.save(&keep).unwrap();
        repo.save(&drop).unwrap();
        assert!(repo.mark_discarded("alice", &drop.id).unwrap());

        assert_eq!(repo.list("alice", false).unwrap().len(), 1);
        assert_eq!(repo.list("alice", true).unwrap().len(), 2);
    }

    #[test]
    fn test_memory_content_protection() {
        let repo = repository();
        let mut memory = MemoryFact::new("alice", "Allergic to peanuts", "health");
        memory.protection_level = ProtectionLevel::Enhanced;
        repo.save_memory(&memory).unwrap();

        let raw = repo.store().get_memory("alice", &memory.id).unwrap().unwrap();
        assert_ne!(raw.content, "Allergic to peanuts");

        let loaded = repo.load_memory("alice", &memory.id).unwrap().unwrap();
        assert!(loaded.anomaly.is_none());
        assert_eq!(loaded.memory, memory);

        let listed = repo.list_memories("alice").unwrap();
        assert_eq!(listed.len(), 1);
        assert!(repo.delete_memory("alice", &memory.id).unwrap());
    }
}
