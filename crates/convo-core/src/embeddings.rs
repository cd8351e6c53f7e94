//! ============================================================================
//! Embedding Service - Text vectors for conversation retrieval
//! ============================================================================
//! OpenAI-compatible `/embeddings` client behind the `Embedder` trait, so the
//! retrieval planner and tests can swap in other providers.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EmbeddingConfig;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default embedding model (OpenAI compatible)
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";

/// Embedding dimension for text-embedding-3-large
pub const EMBEDDING_DIM: usize = 3072;

/// Known output dimension for a model name
pub fn dimension_for_model(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-large" => Some(3072),
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

/// Text-to-vector collaborator
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed(vec![text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding returned"))
    }

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;
}

/// `Embedder` over an OpenAI-compatible HTTP endpoint
pub struct EmbeddingService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    model: String,
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl EmbeddingService {
    /// OpenAI with the default model
    pub fn new_openai(api_key: String) -> Self {
        Self::new_custom(
            api_key,
            OPENAI_BASE_URL.to_string(),
            DEFAULT_EMBEDDING_MODEL.to_string(),
        )
    }

    /// Custom endpoint and model. Unknown models are assumed to produce
    /// `EMBEDDING_DIM` floats.
    pub fn new_custom(api_key: String, base_url: String, model: String) -> Self {
        let dimension = dimension_for_model(&model).unwrap_or(EMBEDDING_DIM);
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimension,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("No embedding API key available (set OPENAI_API_KEY)"))?;
        Ok(Self::new_custom(
            api_key,
            config.base_url.clone(),
            config.model.clone(),
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let expected = texts.len();
        debug!("Embedding {} texts with {}", expected, self.model);

        let request = EmbeddingRequest {
            model: &self.model,
            input: &texts,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Embedding request to {} failed: {}", self.base_url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read embedding response: {}", e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(anyhow!("Embedding endpoint returned {}: {}", status, message));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| anyhow!("Unexpected embedding response: {}", e))?;
        if let Some(usage) = &parsed.usage {
            debug!("{} used {} tokens", parsed.model, usage.total_tokens);
        }

        let embeddings = order_by_index(parsed.data);
        if embeddings.len() != expected {
            return Err(anyhow!(
                "Embedding API returned {} vectors for {} inputs",
                embeddings.len(),
                expected
            ));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(anyhow!(
                "Embedding has {} dimensions, expected {}",
                bad.len(),
                self.dimension
            ));
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn order_by_index(data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    let mut embeddings: Vec<(usize, Vec<f32>)> =
        data.into_iter().map(|d| (d.index, d.embedding)).collect();
    embeddings.sort_by_key(|(idx, _)| *idx);
    embeddings.into_iter().map(|(_, e)| e).collect()
}
