// ============================================================================
// RedbRecordStore - Embedded record store (redb)
// ============================================================================
// Conversations and memories are bincode blobs keyed
// "{owner_len}:{owner_id}:{id}", so an owner's records form one contiguous
// key range and no two (owner, id) pairs share a key.
// ============================================================================

use anyhow::{anyhow, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::types::{ConversationRecord, DbStats, MemoryRecord};
use super::{compute_stats, owner_prefix, record_key, sort_newest_first, RecordStore};

const CONVERSATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("conversations");
const MEMORIES: TableDefinition<&str, &[u8]> = TableDefinition::new("memories");

pub struct RedbRecordStore {
    db: Database,
    path: Option<PathBuf>,
}

impl RedbRecordStore {
    /// Open (or create) the store at `path`, creating parent directories
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create {}: {}", parent.display(), e))?;
        }

        info!("Opening record store at: {}", path.display());

        let db = Database::create(path).map_err(|e| anyhow!("Failed to open database: {}", e))?;
        let store = Self {
            db,
            path: Some(path.to_path_buf()),
        };
        store.init_tables()?;
        Ok(store)
    }

    /// Store backed by memory only
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?;
        let store = Self { db, path: None };
        store.init_tables()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_tables(&self) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(CONVERSATIONS)
                .map_err(|e| anyhow!("Failed to create conversations table: {}", e))?;
            let _ = write_txn
                .open_table(MEMORIES)
                .map_err(|e| anyhow!("Failed to create memories table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;
        Ok(())
    }

    fn put(&self, table_def: TableDefinition<&str, &[u8]>, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(table_def)
                .map_err(|e| anyhow!("Failed to open table: {}", e))?;
            table
                .insert(key, value)
                .map_err(|e| anyhow!("Failed to insert {}: {}", key, e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;
        Ok(())
    }

    fn get(&self, table_def: TableDefinition<&str, &[u8]>, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(table_def)
            .map_err(|e| anyhow!("Failed to open table: {}", e))?;

        let value = table
            .get(key)
            .map_err(|e| anyhow!("Failed to get {}: {}", key, e))?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    /// Raw values for every key under the owner's prefix, or the whole table
    /// when `owner_id` is None
    fn scan(&self, table_def: TableDefinition<&str, &[u8]>, owner_id: Option<&str>) -> Result<Vec<Vec<u8>>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(table_def)
            .map_err(|e| anyhow!("Failed to open table: {}", e))?;

        // ';' sorts right after ':'
        let bounds = owner_id.map(|owner| {
            let start = owner_prefix(owner);
            let end = format!("{};", &start[..start.len() - 1]);
            (start, end)
        });

        let mut results = Vec::new();
        let iter = match &bounds {
            Some((start, end)) => table.range::<&str>(start.as_str()..end.as_str()),
            None => table.range::<&str>(..),
        }
        .map_err(|e| anyhow!("Failed to iterate table: {}", e))?;

        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            results.push(value.value().to_vec());
        }
        Ok(results)
    }

    fn remove(&self, table_def: TableDefinition<&str, &[u8]>, key: &str) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn
                .open_table(table_def)
                .map_err(|e| anyhow!("Failed to open table: {}", e))?;
            removed = table
                .remove(key)
                .map_err(|e| anyhow!("Failed to remove {}: {}", key, e))?
                .is_some();
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;
        Ok(removed)
    }
}

fn decode_conversation(bytes: &[u8]) -> Result<ConversationRecord> {
    bincode::deserialize(bytes).map_err(|e| anyhow!("Failed to deserialize conversation: {}", e))
}

fn decode_memory(bytes: &[u8]) -> Result<MemoryRecord> {
    bincode::deserialize(bytes).map_err(|e| anyhow!("Failed to deserialize memory: {}", e))
}

impl RecordStore for RedbRecordStore {
    // ========================================================================
    // Conversations
    // ========================================================================

    fn put_conversation(&self, record: &ConversationRecord) -> Result<()> {
        let value = bincode::serialize(record)
            .map_err(|e| anyhow!("Failed to serialize conversation: {}", e))?;
        self.put(CONVERSATIONS, &record_key(&record.owner_id, &record.id), &value)?;
        debug!("Stored conversation: {}", record.id);
        Ok(())
    }

    fn get_conversation(&self, owner_id: &str, id: &str) -> Result<Option<ConversationRecord>> {
        Ok(self
            .get(CONVERSATIONS, &record_key(owner_id, id))?
            .map(|bytes| decode_conversation(&bytes))
            .transpose()?
            .filter(|record| record.owner_id == owner_id))
    }

    fn list_conversations(&self, owner_id: &str) -> Result<Vec<ConversationRecord>> {
        let mut records = self
            .scan(CONVERSATIONS, Some(owner_id))?
            .iter()
            .map(|bytes| decode_conversation(bytes))
            .collect::<Result<Vec<_>>>()?;
        records.retain(|r| r.owner_id == owner_id);
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn delete_conversation(&self, owner_id: &str, id: &str) -> Result<bool> {
        let removed = self.remove(CONVERSATIONS, &record_key(owner_id, id))?;
        if removed {
            debug!("Deleted conversation: {}", id);
        }
        Ok(removed)
    }

    fn mark_discarded(&self, owner_id: &str, id: &str) -> Result<bool> {
        let key = record_key(owner_id, id);

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let found;
        {
            let mut table = write_txn
                .open_table(CONVERSATIONS)
                .map_err(|e| anyhow!("Failed to open conversations table: {}", e))?;
            let existing = table
                .get(key.as_str())
                .map_err(|e| anyhow!("Failed to get conversation: {}", e))?
                .map(|v| v.value().to_vec());

            let record = existing
                .map(|bytes| decode_conversation(&bytes))
                .transpose()?
                .filter(|record| record.owner_id == owner_id);

            found = record.is_some();
            if let Some(mut record) = record {
                record.discarded = true;
                let value = bincode::serialize(&record)
                    .map_err(|e| anyhow!("Failed to serialize conversation: {}", e))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(|e| anyhow!("Failed to insert conversation: {}", e))?;
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        if found {
            debug!("Marked conversation {} discarded", id);
        }
        Ok(found)
    }

    // ========================================================================
    // Memories
    // ========================================================================

    fn put_memory(&self, record: &MemoryRecord) -> Result<()> {
        let value =
            bincode::serialize(record).map_err(|e| anyhow!("Failed to serialize memory: {}", e))?;
        self.put(MEMORIES, &record_key(&record.owner_id, &record.id), &value)?;
        debug!("Stored memory: {}", record.id);
        Ok(())
    }

    fn get_memory(&self, owner_id: &str, id: &str) -> Result<Option<MemoryRecord>> {
        Ok(self
            .get(MEMORIES, &record_key(owner_id, id))?
            .map(|bytes| decode_memory(&bytes))
            .transpose()?
            .filter(|record| record.owner_id == owner_id))
    }

    fn list_memories(&self, owner_id: &str) -> Result<Vec<MemoryRecord>> {
        let mut records = self
            .scan(MEMORIES, Some(owner_id))?
            .iter()
            .map(|bytes| decode_memory(bytes))
            .collect::<Result<Vec<_>>>()?;
        records.retain(|r| r.owner_id == owner_id);
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    fn delete_memory(&self, owner_id: &str, id: &str) -> Result<bool> {
        self.remove(MEMORIES, &record_key(owner_id, id))
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    fn stats(&self) -> Result<DbStats> {
        let conversations = self
            .scan(CONVERSATIONS, None)?
            .iter()
            .map(|bytes| decode_conversation(bytes))
            .collect::<Result<Vec<_>>>()?;
        let memories = self.scan(MEMORIES, None)?.len();
        Ok(compute_stats(&conversations, memories))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{conversation_record, exercise_store};

    #[test]
    fn test_redb_store_contract() {
        exercise_store(&RedbRecordStore::in_memory().unwrap());
    }

    #[test]
    fn test_owner_prefix_does_not_leak() {
        let store = RedbRecordStore::in_memory().unwrap();
        store.put_conversation(&conversation_record("al", "c1", 1)).unwrap();
        store.put_conversation(&conversation_record("al:ice", "c2", 2)).unwrap();

        let listed = store.list_conversations("al").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "c1");
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("records.redb");
        {
            let store = RedbRecordStore::open(&path).unwrap();
            store.put_conversation(&conversation_record("alice", "c1", 1)).unwrap();
        }
        let store = RedbRecordStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert!(store.get_conversation("alice", "c1").unwrap().is_some());
    }
}
