//! In-process record store for tests and dry runs.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{compute_stats, record_key, sort_newest_first, RecordStore};
use super::types::{ConversationRecord, DbStats, MemoryRecord};

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    conversations: RwLock<HashMap<String, ConversationRecord>>,
    memories: RwLock<HashMap<String, MemoryRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("Record store lock poisoned")
}

impl RecordStore for MemoryRecordStore {
    fn put_conversation(&self, record: &ConversationRecord) -> Result<()> {
        self.conversations
            .write()
            .map_err(poisoned)?
            .insert(record_key(&record.owner_id, &record.id), record.clone());
        Ok(())
    }

    fn get_conversation(&self, owner_id: &str, id: &str) -> Result<Option<ConversationRecord>> {
        Ok(self
            .conversations
            .read()
            .map_err(poisoned)?
            .get(&record_key(owner_id, id))
            .filter(|record| record.owner_id == owner_id)
            .cloned())
    }

    fn list_conversations(&self, owner_id: &str) -> Result<Vec<ConversationRecord>> {
        let mut records: Vec<ConversationRecord> = self
            .conversations
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn delete_conversation(&self, owner_id: &str, id: &str) -> Result<bool> {
        Ok(self
            .conversations
            .write()
            .map_err(poisoned)?
            .remove(&record_key(owner_id, id))
            .is_some())
    }

    fn mark_discarded(&self, owner_id: &str, id: &str) -> Result<bool> {
        let mut conversations = self.conversations.write().map_err(poisoned)?;
        match conversations.get_mut(&record_key(owner_id, id)) {
            Some(record) if record.owner_id == owner_id => {
                record.discarded = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn put_memory(&self, record: &MemoryRecord) -> Result<()> {
        self.memories
            .write()
            .map_err(poisoned)?
            .insert(record_key(&record.owner_id, &record.id), record.clone());
        Ok(())
    }

    fn get_memory(&self, owner_id: &str, id: &str) -> Result<Option<MemoryRecord>> {
        Ok(self
            .memories
            .read()
            .map_err(poisoned)?
            .get(&record_key(owner_id, id))
            .filter(|record| record.owner_id == owner_id)
            .cloned())
    }

    fn list_memories(&self, owner_id: &str) -> Result<Vec<MemoryRecord>> {
        let mut records: Vec<MemoryRecord> = self
            .memories
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    fn delete_memory(&self, owner_id: &str, id: &str) -> Result<bool> {
        Ok(self
            .memories
            .write()
            .map_err(poisoned)?
            .remove(&record_key(owner_id, id))
            .is_some())
    }

    fn stats(&self) -> Result<DbStats> {
        let conversations: Vec<ConversationRecord> = self
            .conversations
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect();
        let memories = self.memories.read().map_err(poisoned)?.len();
        Ok(compute_stats(&conversations, memories))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::exercise_store;

    #[test]
    fn test_memory_store_contract() {
        exercise_store(&MemoryRecordStore::new());
    }
}
