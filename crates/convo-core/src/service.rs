//! ============================================================================
//! Conversation Service - Persist, index, search
//! ============================================================================
//! High-level API over the repository, the vector index and the embedder.
//! The record and its embedding are written independently: when indexing
//! fails after a successful save, the error is returned and the record stays.
//! ============================================================================

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::db::{open_record_store, ConversationRepository, LoadedConversation};
use crate::embeddings::{Embedder, EmbeddingService, EMBEDDING_DIM};
use crate::protection::ProtectionCodec;
use crate::retrieval::{RetrievalPlanner, SearchRequest};
use crate::speaker::{SpeakerClassifier, VoiceReference};
use crate::types::Conversation;
use crate::vector::{
    open_vector_store, record_key, EmbeddingMetadata, MetadataFilter, VectorRecord, VectorStore,
};

/// Extracted metadata stored next to a conversation's embedding
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationTags {
    /// People present in the conversation
    pub people: Vec<String>,
    pub people_mentioned: Vec<String>,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    pub dates: Vec<String>,
}

impl ConversationTags {
    fn into_metadata(self, conversation: &Conversation) -> EmbeddingMetadata {
        EmbeddingMetadata {
            people: self.people,
            people_mentioned: self.people_mentioned,
            topics: self.topics,
            entities: self.entities,
            dates: self.dates,
            ..EmbeddingMetadata::new(
                &conversation.owner_id,
                &conversation.id,
                conversation.created_at,
            )
        }
    }
}

/// Text the conversation embedding is computed from
pub fn embedding_text(conversation: &Conversation) -> String {
    let structured = &conversation.structured;
    [
        structured.title.clone(),
        structured.overview.clone(),
        conversation.transcript_text(),
    ]
    .into_iter()
    .filter(|part| !part.trim().is_empty())
    .collect::<Vec<_>>()
    .join("\n\n")
}

pub struct ConversationService {
    repository: ConversationRepository,
    vectors: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn Embedder>>,
    planner: RetrievalPlanner,
}

impl ConversationService {
    pub fn new(
        repository: ConversationRepository,
        vectors: Arc<dyn VectorStore>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let planner = RetrievalPlanner::new(vectors.clone(), embedder.clone());
        Self {
            repository,
            vectors,
            embedder,
            planner,
        }
    }

    /// Wire up every backend selected by configuration
    pub async fn open(config: &CoreConfig) -> Result<Self> {
        let store = open_record_store(config)?;

        let codec = match &config.encryption_secret {
            Some(secret) => ProtectionCodec::new(secret).context("Invalid encryption secret")?,
            None => {
                warn!("No encryption secret configured, enhanced records cannot be written");
                ProtectionCodec::standard_only()
            }
        };

        let embedder: Option<Arc<dyn Embedder>> = match EmbeddingService::from_config(&config.embeddings) {
            Ok(service) => Some(Arc::new(service)),
            Err(e) => {
                warn!("Embeddings unavailable: {}", e);
                None
            }
        };
        let dimension = embedder
            .as_ref()
            .map(|e| e.dimension())
            .unwrap_or(EMBEDDING_DIM);

        let vectors = open_vector_store(config, dimension)
            .await
            .context("Failed to open vector store")?;
        info!("Vector store: {}", vectors.name());

        Ok(Self::new(ConversationRepository::new(store, codec), vectors, embedder))
    }

    pub fn repository(&self) -> &ConversationRepository {
        &self.repository
    }

    pub fn vectors(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    pub fn planner(&self) -> &RetrievalPlanner {
        &self.planner
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Save the conversation, then index its embedding
    pub async fn create(&self, conversation: &Conversation, tags: ConversationTags) -> Result<()> {
        self.repository.save(conversation)?;
        self.index(conversation, tags)
            .await
            .with_context(|| format!("Conversation {} saved but not indexed", conversation.id))?;

        info!(
            "Created conversation {} for {} ({})",
            conversation.id, conversation.owner_id, conversation.protection_level
        );
        Ok(())
    }

    /// Compute and upsert the conversation's embedding
    pub async fn index(&self, conversation: &Conversation, tags: ConversationTags) -> Result<()> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| anyhow!("No embedder configured"))?;

        let vector = embedder.embed_single(&embedding_text(conversation)).await?;
        let metadata = tags.into_metadata(conversation);
        self.vectors.upsert(VectorRecord::new(vector, metadata)).await?;

        debug!("Indexed conversation {}", conversation.id);
        Ok(())
    }

    /// Replace the metadata of an indexed conversation. `Ok(false)` when the
    /// conversation or its embedding does not exist.
    pub async fn update_metadata(&self, owner_id: &str, id: &str, tags: ConversationTags) -> Result<bool> {
        let Some(loaded) = self.repository.load(owner_id, id)? else {
            return Ok(false);
        };

        let metadata = tags.into_metadata(&loaded.conversation);
        let updated = self
            .vectors
            .update_metadata(&record_key(owner_id, id), metadata)
            .await?;
        if !updated {
            debug!("No embedding to update for conversation {}", id);
        }
        Ok(updated)
    }

    /// Remove the record and its embedding
    pub async fn delete(&self, owner_id: &str, id: &str) -> Result<bool> {
        let removed = self.repository.delete(owner_id, id)?;
        self.vectors
            .delete(MetadataFilter::All(vec![
                MetadataFilter::owner(owner_id),
                MetadataFilter::conversation(id),
            ]))
            .await
            .with_context(|| format!("Conversation {} deleted but its embedding remains", id))?;

        if removed {
            info!("Deleted conversation {} for {}", id, owner_id);
        }
        Ok(removed)
    }

    /// Attribute each segment to the owner or a known person before saving
    pub async fn attribute_speakers(
        &self,
        classifier: &SpeakerClassifier,
        audio_wav: &[u8],
        references: &[VoiceReference],
        conversation: &mut Conversation,
    ) -> Result<()> {
        let results = classifier
            .classify(audio_wav, references, &conversation.transcript_segments)
            .await?;
        for (segment, result) in conversation.transcript_segments.iter_mut().zip(results.iter()) {
            segment.apply_classification(result);
        }
        Ok(())
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// Ranked, decoded conversations. Ids whose record is gone or discarded
    /// are skipped.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<LoadedConversation>> {
        let ids = self.planner.search(request).await?;

        let mut conversations = Vec::with_capacity(ids.len());
        for id in ids {
            match self.repository.load(&request.owner_id, &id)? {
                Some(loaded) if !loaded.conversation.discarded => conversations.push(loaded),
                Some(_) => debug!("Skipping discarded conversation {}", id),
                None => warn!("Indexed conversation {} has no record", id),
            }
        }
        Ok(conversations)
    }
}
