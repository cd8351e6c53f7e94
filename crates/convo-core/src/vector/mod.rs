//! ============================================================================
//! Vector Store - Similarity search over conversation embeddings
//! ============================================================================
//! One embedding per (owner, conversation), keyed "{owner_id}-{conversation_id}".
//! Engines:
//! - `QdrantVectorStore`: remote Qdrant collection (cosine)
//! - `LocalVectorStore`: redb-backed exact k-NN scan
//! - `DisabledVectorStore`: no engine configured
//!
//! Query results are ordered by descending cosine similarity, ties by
//! ascending key, in every engine.
//! ============================================================================

pub mod filter;
mod local;
mod qdrant;

pub use filter::{MetadataField, MetadataFilter};
pub use local::LocalVectorStore;
pub use qdrant::QdrantVectorStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

use crate::config::{CoreConfig, VectorBackend};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VectorStoreError {
    #[error("No vector engine configured")]
    NotConfigured,

    #[error("Vector engine unavailable: {0}")]
    Unavailable(String),

    #[error("Vector engine error: {0}")]
    Backend(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("Vector serialization error: {0}")]
    Serialization(String),
}

/// Filterable metadata stored next to each embedding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub owner_id: String,
    pub conversation_id: String,
    /// Speakers identified in the conversation
    pub people: Vec<String>,
    /// People talked about
    pub people_mentioned: Vec<String>,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    pub dates: Vec<String>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

impl EmbeddingMetadata {
    pub fn new(owner_id: impl Into<String>, conversation_id: impl Into<String>, created_at: i64) -> Self {
        Self {
            owner_id: owner_id.into(),
            conversation_id: conversation_id.into(),
            created_at,
            ..Default::default()
        }
    }

    pub fn key(&self) -> String {
        record_key(&self.owner_id, &self.conversation_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub key: String,
    pub vector: Vec<f32>,
    pub metadata: EmbeddingMetadata,
}

impl VectorRecord {
    pub fn new(vector: Vec<f32>, metadata: EmbeddingMetadata) -> Self {
        Self {
            key: metadata.key(),
            vector,
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub k: usize,
    pub filter: Option<MetadataFilter>,
    pub with_vectors: bool,
}

impl VectorQuery {
    pub fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector,
            k,
            filter: None,
            with_vectors: false,
        }
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub key: String,
    pub score: f32,
    pub metadata: EmbeddingMetadata,
    pub vector: Option<Vec<f32>>,
}

/// Uniform interface over a similarity-search engine
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the record under its key
    async fn upsert(&self, record: VectorRecord) -> Result<(), VectorStoreError>;

    /// Top-k records by cosine similarity among those matching the filter
    async fn query(&self, query: VectorQuery) -> Result<Vec<VectorMatch>, VectorStoreError>;

    /// Remove every record matching the filter
    async fn delete(&self, filter: MetadataFilter) -> Result<(), VectorStoreError>;

    async fn fetch(&self, key: &str) -> Result<Option<VectorRecord>, VectorStoreError>;

    /// Replace the metadata of an existing record, keeping its vector.
    /// Returns false when the key is unknown.
    async fn update_metadata(
        &self,
        key: &str,
        metadata: EmbeddingMetadata,
    ) -> Result<bool, VectorStoreError>;

    async fn count(&self) -> Result<u64, VectorStoreError>;

    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    /// Engine name for logs and stats
    fn name(&self) -> &'static str;
}

/// Composite key "{owner_id}-{conversation_id}"
pub fn record_key(owner_id: &str, conversation_id: &str) -> String {
    format!("{}-{}", owner_id, conversation_id)
}

/// Deterministic UUID for engines that need UUID point ids: the first 16
/// bytes of SHA-256(key) with the version 4 and variant bits set.
pub fn point_uuid(key: &str) -> uuid::Uuid {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

/// Cosine similarity; 0.0 when either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Descending score, ties by ascending key
pub(crate) fn sort_matches(matches: &mut [VectorMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Placeholder engine used when vector search is switched off
#[derive(Debug, Default)]
pub struct DisabledVectorStore;

#[async_trait]
impl VectorStore for DisabledVectorStore {
    async fn upsert(&self, _record: VectorRecord) -> Result<(), VectorStoreError> {
        Err(VectorStoreError::NotConfigured)
    }

    async fn query(&self, _query: VectorQuery) -> Result<Vec<VectorMatch>, VectorStoreError> {
        Err(VectorStoreError::NotConfigured)
    }

    async fn delete(&self, _filter: MetadataFilter) -> Result<(), VectorStoreError> {
        Err(VectorStoreError::NotConfigured)
    }

    async fn fetch(&self, _key: &str) -> Result<Option<VectorRecord>, VectorStoreError> {
        Err(VectorStoreError::NotConfigured)
    }

    async fn update_metadata(
        &self,
        _key: &str,
        _metadata: EmbeddingMetadata,
    ) -> Result<bool, VectorStoreError> {
        Err(VectorStoreError::NotConfigured)
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        Err(VectorStoreError::NotConfigured)
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        Err(VectorStoreError::NotConfigured)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Open the vector engine selected by configuration
pub async fn open_vector_store(
    config: &CoreConfig,
    dimension: usize,
) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    match &config.vectors {
        VectorBackend::Qdrant { url, collection } => {
            let store = QdrantVectorStore::connect(url, collection, dimension).await?;
            Ok(Arc::new(store))
        }
        VectorBackend::Local { path } => {
            let store = LocalVectorStore::open(path, dimension)?;
            Ok(Arc::new(store))
        }
        VectorBackend::Disabled => {
            info!("Vector search disabled");
            Ok(Arc::new(DisabledVectorStore))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key() {
        assert_eq!(record_key("uid1", "conv9"), "uid1-conv9");
        let metadata = EmbeddingMetadata::new("uid1", "conv9", 0);
        assert_eq!(VectorRecord::new(vec![1.0], metadata).key, "uid1-conv9");
    }

    #[test]
    fn test_point_uuid_is_deterministic() {
        let a = point_uuid("uid1-conv9");
        assert_eq!(a, point_uuid("uid1-conv9"));
        assert_ne!(a, point_uuid("uid1-conv10"));
        assert_eq!(a.get_version_num(), 4);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_sort_matches_breaks_ties_by_key() {
        let m = |key: &str, score: f32| VectorMatch {
            key: key.to_string(),
            score,
            metadata: EmbeddingMetadata::default(),
            vector: None,
        };
        let mut matches = vec![m("b", 0.5), m("c", 0.9), m("a", 0.5)];
        sort_matches(&mut matches);
        let keys: Vec<&str> = matches.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_disabled_store_is_not_configured() {
        let store = DisabledVectorStore;
        let err = store.query(VectorQuery::new(vec![1.0], 5)).await.unwrap_err();
        assert_eq!(err, VectorStoreError::NotConfigured);
        assert_eq!(store.count().await, Err(VectorStoreError::NotConfigured));
    }
}
