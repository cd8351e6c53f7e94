// ============================================================================
// RetrievalPlanner - Filter construction, fallback, re-ranking
// ============================================================================
// Attempts run strictly one after another; the fallback only happens when
// the structured attempt returned nothing.
// ============================================================================

use std::sync::Arc;
use tracing::{debug, info};

use super::{
    rerank, DateRange, RetrievalReport, SearchQuery, SearchRequest, StructuredFilters,
    FALLBACK_CANDIDATE_POOL, PRIMARY_CANDIDATE_POOL,
};
use crate::embeddings::Embedder;
use crate::vector::{MetadataField, MetadataFilter, VectorMatch, VectorQuery, VectorStore, VectorStoreError};

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Vector(#[from] VectorStoreError),

    #[error("Text query needs an embedder, none configured")]
    NoEmbedder,

    #[error("Embedding failed: {0}")]
    Embedding(String),
}

#[derive(Clone)]
pub struct RetrievalPlanner {
    store: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl RetrievalPlanner {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { store, embedder }
    }

    /// Ranked conversation ids, at most `request.limit`
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<String>, RetrievalError> {
        Ok(self.search_detailed(request).await?.conversation_ids)
    }

    pub async fn search_detailed(&self, request: &SearchRequest) -> Result<RetrievalReport, RetrievalError> {
        let vector = self.resolve_query(&request.query).await?;

        let base = base_conditions(&request.owner_id, &request.date_range);
        let structured = structured_condition(&request.filters);
        let has_structured = structured.is_some();

        let mut conditions = base.clone();
        conditions.extend(structured);

        let primary = self
            .store
            .query(VectorQuery {
                vector: vector.clone(),
                k: PRIMARY_CANDIDATE_POOL,
                filter: Some(MetadataFilter::All(conditions)),
                with_vectors: false,
            })
            .await?;
        let primary_count = primary.len();

        let (matches, fallback_used) = if primary.is_empty() && has_structured {
            info!(
                "No conversations matched structured filters for owner {}, retrying without them",
                request.owner_id
            );
            let relaxed = self
                .store
                .query(VectorQuery {
                    vector,
                    k: FALLBACK_CANDIDATE_POOL,
                    filter: Some(MetadataFilter::All(base)),
                    with_vectors: false,
                })
                .await?;
            (relaxed, true)
        } else {
            (primary, false)
        };

        let candidates = rerank(matches, &request.filters, request.limit);
        let conversation_ids: Vec<String> =
            candidates.iter().map(|c| c.conversation_id.clone()).collect();

        debug!(
            "Retrieval for owner {} returned {} conversations (primary {}, fallback {})",
            request.owner_id,
            conversation_ids.len(),
            primary_count,
            fallback_used
        );

        Ok(RetrievalReport {
            conversation_ids,
            candidates,
            fallback_used,
            primary_count,
        })
    }

    /// Plain similarity search: owner and date filter only
    pub async fn similar(
        &self,
        owner_id: &str,
        text: &str,
        date_range: DateRange,
        k: usize,
    ) -> Result<Vec<String>, RetrievalError> {
        let vector = self.resolve_query(&SearchQuery::Text(text.to_string())).await?;
        let matches: Vec<VectorMatch> = self
            .store
            .query(VectorQuery {
                vector,
                k,
                filter: Some(MetadataFilter::All(base_conditions(owner_id, &date_range))),
                with_vectors: false,
            })
            .await?;
        Ok(matches
            .into_iter()
            .map(|m| m.metadata.conversation_id)
            .collect())
    }

    async fn resolve_query(&self, query: &SearchQuery) -> Result<Vec<f32>, RetrievalError> {
        match query {
            SearchQuery::Vector(vector) => Ok(vector.clone()),
            SearchQuery::Text(text) => {
                let embedder = self.embedder.as_ref().ok_or(RetrievalError::NoEmbedder)?;
                embedder
                    .embed_single(text)
                    .await
                    .map_err(|e| RetrievalError::Embedding(e.to_string()))
            }
        }
    }
}

/// owner == X, plus created_at within the window when it constrains
fn base_conditions(owner_id: &str, date_range: &DateRange) -> Vec<MetadataFilter> {
    let mut conditions = vec![MetadataFilter::owner(owner_id)];
    if let Some((gte, lte)) = date_range.bounds() {
        conditions.push(MetadataFilter::created_between(gte, lte));
    }
    conditions
}

/// OR over the non-empty categories, None when all are empty
fn structured_condition(filters: &StructuredFilters) -> Option<MetadataFilter> {
    let categories = [
        (MetadataField::People, &filters.people),
        (MetadataField::Topics, &filters.topics),
        (MetadataField::Entities, &filters.entities),
    ];

    let any: Vec<MetadataFilter> = categories
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(field, values)| MetadataFilter::AnyOf(field, values.clone()))
        .collect();

    if any.is_empty() {
        None
    } else {
        Some(MetadataFilter::Any(any))
    }
}
