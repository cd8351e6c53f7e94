//! ============================================================================
//! Qdrant Vector Store - Conversation embeddings in a Qdrant collection
//! ============================================================================
//! Point ids are deterministic UUIDs derived from the record key; the key
//! itself is kept in the payload next to the metadata fields.
//! ============================================================================

use async_trait::async_trait;
use qdrant_client::qdrant::{
    points_selector::PointsSelectorOneOf, value::Kind, vectors_output::VectorsOptions, Condition,
    CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Distance,
    FieldType, Filter, GetPointsBuilder, ListValue, PointId, PointStruct, Range,
    SearchPointsBuilder, SetPayloadPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
    VectorsOutput,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{
    point_uuid, sort_matches, EmbeddingMetadata, MetadataField, MetadataFilter, VectorMatch,
    VectorQuery, VectorRecord, VectorStore, VectorStoreError,
};

const KEY_FIELD: &str = "key";

/// Vector store backed by a Qdrant collection
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

fn backend(context: &str, e: impl std::fmt::Display) -> VectorStoreError {
    VectorStoreError::Backend(format!("{}: {}", context, e))
}

impl QdrantVectorStore {
    /// Connect and make sure the collection and its payload indexes exist
    pub async fn connect(url: &str, collection: &str, dimension: usize) -> Result<Self, VectorStoreError> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Unavailable(format!("Failed to create Qdrant client: {}", e)))?;

        let store = Self {
            client,
            collection: collection.to_string(),
            dimension,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| VectorStoreError::Unavailable(format!("Failed to check collection: {}", e)))?;

        if exists {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }

        info!("Creating collection: {}", self.collection);
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
                ),
            )
            .await
            .map_err(|e| backend("Failed to create collection", e))?;

        for field in MetadataField::KEYWORDS {
            self.create_index(field.as_str(), FieldType::Keyword).await?;
        }
        self.create_index(MetadataField::CreatedAt.as_str(), FieldType::Integer)
            .await?;

        info!("Collection {} created successfully", self.collection);
        Ok(())
    }

    async fn create_index(&self, field: &str, field_type: FieldType) -> Result<(), VectorStoreError> {
        self.client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(&self.collection, field, field_type).wait(true),
            )
            .await
            .map_err(|e| backend("Failed to create payload index", e))?;
        Ok(())
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
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(&self, record: VectorRecord) -> Result<(), VectorStoreError> {
        self.check_dimension(&record.vector)?;

        let point = PointStruct::new(
            point_uuid(&record.key).to_string(),
            record.vector,
            to_payload(&record.key, &record.metadata),
        );

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .map_err(|e| backend("Failed to upsert vector", e))?;

        debug!("Upserted vector {}", record.key);
        Ok(())
    }

    async fn query(&self, query: VectorQuery) -> Result<Vec<VectorMatch>, VectorStoreError> {
        self.check_dimension(&query.vector)?;

        let mut search = SearchPointsBuilder::new(&self.collection, query.vector, query.k as u64)
            .with_payload(true)
            .with_vectors(query.with_vectors);
        if let Some(filter) = &query.filter {
            search = search.filter(to_filter(filter));
        }

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(|e| backend("Failed to search vectors", e))?;

        let mut matches: Vec<VectorMatch> = response
            .result
            .into_iter()
            .filter_map(|point| {
                let (key, metadata) = from_payload(&point.payload)?;
                Some(VectorMatch {
                    key,
                    score: point.score,
                    metadata,
                    vector: extract_vector(point.vectors),
                })
            })
            .collect();

        sort_matches(&mut matches);
        debug!("Qdrant query matched {} vectors", matches.len());
        Ok(matches)
    }

    async fn delete(&self, filter: MetadataFilter) -> Result<(), VectorStoreError> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsSelectorOneOf::Filter(to_filter(&filter)))
                    .wait(true),
            )
            .await
            .map_err(|e| backend("Failed to delete vectors", e))?;
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<VectorRecord>, VectorStoreError> {
        let id: PointId = point_uuid(key).to_string().into();
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.collection, vec![id])
                    .with_payload(true)
                    .with_vectors(true),
            )
            .await
            .map_err(|e| backend("Failed to fetch vector", e))?;

        Ok(response.result.into_iter().next().and_then(|point| {
            let (key, metadata) = from_payload(&point.payload)?;
            Some(VectorRecord {
                key,
                vector: extract_vector(point.vectors)?,
                metadata,
            })
        }))
    }

    async fn update_metadata(
        &self,
        key: &str,
        metadata: EmbeddingMetadata,
    ) -> Result<bool, VectorStoreError> {
        let id: PointId = point_uuid(key).to_string().into();
        let existing = self
            .client
            .get_points(GetPointsBuilder::new(&self.collection, vec![id.clone()]))
            .await
            .map_err(|e| backend("Failed to fetch vector", e))?;
        if existing.result.is_empty() {
            return Ok(false);
        }

        // Overwrite replaces the whole payload; the stored vector is untouched.
        let payload = Payload::from(to_payload(key, &metadata));
        self.client
            .overwrite_payload(
                SetPayloadPointsBuilder::new(&self.collection, payload)
                    .points_selector(vec![id])
                    .wait(true),
            )
            .await
            .map_err(|e| backend("Failed to update vector metadata", e))?;
        Ok(true)
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(|e| backend("Failed to get collection info", e))?;
        Ok(info.result.and_then(|r| r.points_count).unwrap_or(0))
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        match self.client.health_check().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Qdrant health check failed: {}", e);
                Ok(false)
            }
        }
    }

    fn name(&self) -> &'static str {
        "qdrant"
    }
}

// ============================================================================
// Filter translation
// ============================================================================

fn to_filter(filter: &MetadataFilter) -> Filter {
    match filter {
        MetadataFilter::All(children) => Filter::must(children.iter().map(to_condition)),
        MetadataFilter::Any(children) => Filter::should(children.iter().map(to_condition)),
        leaf => Filter::must([to_condition(leaf)]),
    }
}

fn to_condition(filter: &MetadataFilter) -> Condition {
    match filter {
        MetadataFilter::All(_) | MetadataFilter::Any(_) => Condition::from(to_filter(filter)),
        MetadataFilter::Eq(field, value) => Condition::matches(field.as_str(), value.clone()),
        MetadataFilter::AnyOf(field, values) => Condition::matches(field.as_str(), values.clone()),
        MetadataFilter::Range { field, gte, lte } => Condition::range(
            field.as_str(),
            Range {
                gte: gte.map(|v| v as f64),
                lte: lte.map(|v| v as f64),
                ..Default::default()
            },
        ),
    }
}

// ============================================================================
// Payload helpers
// ============================================================================

fn list_value(items: &[String]) -> Value {
    Value {
        kind: Some(Kind::ListValue(ListValue {
            values: items.iter().map(|s| Value::from(s.clone())).collect(),
        })),
    }
}

fn to_payload(key: &str, metadata: &EmbeddingMetadata) -> HashMap<String, Value> {
    [
        (KEY_FIELD.to_string(), Value::from(key.to_string())),
        (
            MetadataField::OwnerId.as_str().to_string(),
            Value::from(metadata.owner_id.clone()),
        ),
        (
            MetadataField::ConversationId.as_str().to_string(),
            Value::from(metadata.conversation_id.clone()),
        ),
        (MetadataField::People.as_str().to_string(), list_value(&metadata.people)),
        (
            MetadataField::PeopleMentioned.as_str().to_string(),
            list_value(&metadata.people_mentioned),
        ),
        (MetadataField::Topics.as_str().to_string(), list_value(&metadata.topics)),
        (MetadataField::Entities.as_str().to_string(), list_value(&metadata.entities)),
        (MetadataField::Dates.as_str().to_string(), list_value(&metadata.dates)),
        (
            MetadataField::CreatedAt.as_str().to_string(),
            Value::from(metadata.created_at),
        ),
    ]
    .into_iter()
    .collect()
}

fn from_payload(payload: &HashMap<String, Value>) -> Option<(String, EmbeddingMetadata)> {
    let metadata = EmbeddingMetadata {
        owner_id: get_string(payload, MetadataField::OwnerId.as_str())?,
        conversation_id: get_string(payload, MetadataField::ConversationId.as_str())?,
        people: get_list(payload, MetadataField::People.as_str()),
        people_mentioned: get_list(payload, MetadataField::PeopleMentioned.as_str()),
        topics: get_list(payload, MetadataField::Topics.as_str()),
        entities: get_list(payload, MetadataField::Entities.as_str()),
        dates: get_list(payload, MetadataField::Dates.as_str()),
        created_at: payload
            .get(MetadataField::CreatedAt.as_str())
            .and_then(|v| v.as_integer())
            .unwrap_or(0),
    };
    let key = get_string(payload, KEY_FIELD).unwrap_or_else(|| metadata.key());
    Some((key, metadata))
}

fn get_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn get_list(payload: &HashMap<String, Value>, key: &str) -> Vec<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::ListValue(list)) => list
            .values
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        Some(Kind::StringValue(s)) => vec![s.clone()],
        _ => vec![],
    }
}

#[allow(deprecated)]
fn extract_vector(vectors: Option<VectorsOutput>) -> Option<Vec<f32>> {
    match vectors?.vectors_options? {
        VectorsOptions::Vector(v) => Some(v.data),
        _ => None,
    }
}
