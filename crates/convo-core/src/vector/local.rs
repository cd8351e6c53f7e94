// ============================================================================
// LocalVectorStore - Embedded exact k-NN index (redb)
// ============================================================================
// Records are bincode blobs keyed by the composite record key. Queries scan
// every record, evaluate the metadata filter and rank by exact cosine
// similarity. Fine for a single user's corpus and for tests; large shared
// deployments belong on Qdrant.
// ============================================================================

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use tracing::{debug, info};

use super::{
    cosine_similarity, sort_matches, EmbeddingMetadata, MetadataFilter, VectorMatch, VectorQuery,
    VectorRecord, VectorStore, VectorStoreError,
};

const VECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");

pub struct LocalVectorStore {
    db: Database,
    dimension: usize,
}

fn backend(e: impl std::fmt::Display) -> VectorStoreError {
    VectorStoreError::Backend(e.to_string())
}

impl LocalVectorStore {
    pub fn open(path: &Path, dimension: usize) -> Result<Self, VectorStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VectorStoreError::Unavailable(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        info!("Opening local vector index at: {}", path.display());

        let db = Database::create(path)
            .map_err(|e| VectorStoreError::Unavailable(format!("Failed to open index: {}", e)))?;
        Self::with_database(db, dimension)
    }

    pub fn in_memory(dimension: usize) -> Result<Self, VectorStoreError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(backend)?;
        Self::with_database(db, dimension)
    }

    fn with_database(db: Database, dimension: usize) -> Result<Self, VectorStoreError> {
        let write_txn = db.begin_write().map_err(backend)?;
        {
            let _ = write_txn.open_table(VECTORS).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)?;
        Ok(Self { db, dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorStoreError> {
        if vector.len() != self.dimension {
            return Err(VectorStoreError::Dimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn put(&self, record: &VectorRecord) -> Result<(), VectorStoreError> {
        let value = bincode::serialize(record)
            .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;

        let write_txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = write_txn.open_table(VECTORS).map_err(backend)?;
            table
                .insert(record.key.as_str(), value.as_slice())
                .map_err(backend)?;
        }
        write_txn.commit().map_err(backend)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<VectorRecord>, VectorStoreError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(VECTORS).map_err(backend)?;

        let mut records = Vec::new();
        for entry in table.range::<&str>(..).map_err(backend)? {
            let (_key, value) = entry.map_err(backend)?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }
}

fn decode(bytes: &[u8]) -> Result<VectorRecord, VectorStoreError> {
    bincode::deserialize(bytes).map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn upsert(&self, record: VectorRecord) -> Result<(), VectorStoreError> {
        self.check_dimension(&record.vector)?;
        self.put(&record)?;
        debug!("Upserted vector {}", record.key);
        Ok(())
    }

    async fn query(&self, query: VectorQuery) -> Result<Vec<VectorMatch>, VectorStoreError> {
        self.check_dimension(&query.vector)?;

        let mut matches: Vec<VectorMatch> = self
            .scan()?
            .into_iter()
            .filter(|r| query.filter.as_ref().map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| VectorMatch {
                score: cosine_similarity(&query.vector, &r.vector),
                key: r.key,
                metadata: r.metadata,
                vector: query.with_vectors.then_some(r.vector),
            })
            .collect();

        sort_matches(&mut matches);
        matches.truncate(query.k);

        debug!("Local query matched {} vectors", matches.len());
        Ok(matches)
    }

    async fn delete(&self, filter: MetadataFilter) -> Result<(), VectorStoreError> {
        let doomed: Vec<String> = self
            .scan()?
            .into_iter()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| r.key)
            .collect();

        if doomed.is_empty() {
            return Ok(());
        }

        let write_txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = write_txn.open_table(VECTORS).map_err(backend)?;
            for key in &doomed {
                table.remove(key.as_str()).map_err(backend)?;
            }
        }
        write_txn.commit().map_err(backend)?;

        debug!("Deleted {} vectors", doomed.len());
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<VectorRecord>, VectorStoreError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(VECTORS).map_err(backend)?;

        let value = table.get(key).map_err(backend)?;
        match value {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    async fn update_metadata(
        &self,
        key: &str,
        metadata: EmbeddingMetadata,
    ) -> Result<bool, VectorStoreError> {
        // Read and rewrite under one write transaction so a concurrent upsert
        // is never overwritten with the vector read here
        let write_txn = self.db.begin_write().map_err(backend)?;
        let found;
        {
            let mut table = write_txn.open_table(VECTORS).map_err(backend)?;
            let existing = table
                .get(key)
                .map_err(backend)?
                .map(|v| decode(v.value()))
                .transpose()?;

            found = existing.is_some();
            if let Some(existing) = existing {
                let record = VectorRecord {
                    key: existing.key,
                    vector: existing.vector,
                    metadata,
                };
                let value = bincode::serialize(&record)
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                table.insert(key, value.as_slice()).map_err(backend)?;
            }
        }
        write_txn.commit().map_err(backend)?;
        Ok(found)
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(VECTORS).map_err(backend)?;
        let count = table.range::<&str>(..).map_err(backend)?.count();
        Ok(count as u64)
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
