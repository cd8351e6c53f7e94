//! ============================================================================
//! Configuration - Environment-driven backend selection
//! ============================================================================
//! Reads CONVO_* / QDRANT_* / EMBEDDING_* variables (after loading `.env`)
//! once at startup. The selected backends are injected into the components;
//! nothing downstream branches on configuration again.
//! ============================================================================

use std::path::PathBuf;
use tracing::debug;

/// Default Qdrant collection for conversation embeddings
pub const DEFAULT_COLLECTION: &str = "omi_conversations";

/// Default speaker verification threshold (cosine similarity)
pub const DEFAULT_SPEAKER_THRESHOLD: f32 = 0.25;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Cannot determine home directory")]
    NoHomeDir,
}

/// Which record store implementation backs persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBackend {
    /// Embedded redb file
    Redb { path: PathBuf },
    /// Process-local map (tests, dry runs)
    Memory,
}

/// Which vector engine backs similarity search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorBackend {
    Qdrant { url: String, collection: String },
    Local { path: PathBuf },
    /// No engine configured; every vector call reports NotConfigured
    Disabled,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub records: RecordBackend,
    pub vectors: VectorBackend,
    pub embeddings: EmbeddingConfig,
    /// Master secret for per-owner key derivation
    pub encryption_secret: Option<String>,
    /// Root directory of the audio store (speech profiles, samples)
    pub audio_root: PathBuf,
    pub speaker_threshold: f32,
    /// Upper bound on concurrent chunk scoring calls
    pub scoring_workers: Option<usize>,
}

impl CoreConfig {
    /// Load configuration from the process environment.
    /// A missing `.env` file is not an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let records = match get("CONVO_RECORD_BACKEND").as_deref().unwrap_or("redb") {
            "redb" => RecordBackend::Redb {
                path: match get("CONVO_DB_PATH") {
                    Some(p) => PathBuf::from(p),
                    None => default_data_dir()?.join("records.redb"),
                },
            },
            "memory" => RecordBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "CONVO_RECORD_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let vectors = match get("CONVO_VECTOR_BACKEND").as_deref().unwrap_or("local") {
            "qdrant" => VectorBackend::Qdrant {
                url: get("QDRANT_URL").ok_or(ConfigError::Missing("QDRANT_URL"))?,
                collection: get("QDRANT_COLLECTION").unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            },
            "local" => VectorBackend::Local {
                path: match get("CONVO_VECTOR_DB_PATH") {
                    Some(p) => PathBuf::from(p),
                    None => default_data_dir()?.join("vectors.redb"),
                },
            },
            "none" | "disabled" => VectorBackend::Disabled,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "CONVO_VECTOR_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let embeddings = EmbeddingConfig {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("EMBEDDING_BASE_URL")
                .unwrap_or_else(|| crate::embeddings::OPENAI_BASE_URL.to_string()),
            model: get("EMBEDDING_MODEL")
                .unwrap_or_else(|| crate::embeddings::DEFAULT_EMBEDDING_MODEL.to_string()),
        };

        let audio_root = match get("CONVO_AUDIO_ROOT") {
            Some(p) => PathBuf::from(p),
            None => default_data_dir()?.join("audio"),
        };

        let speaker_threshold = match get("CONVO_SPEAKER_THRESHOLD") {
            Some(v) => v.parse::<f32>().map_err(|_| ConfigError::InvalidValue {
                key: "CONVO_SPEAKER_THRESHOLD",
                value: v.clone(),
            })?,
            None => DEFAULT_SPEAKER_THRESHOLD,
        };

        let scoring_workers = match get("CONVO_SCORING_WORKERS") {
            Some(v) => Some(v.parse::<usize>().ok().filter(|n| *n > 0).ok_or(
                ConfigError::InvalidValue {
                    key: "CONVO_SCORING_WORKERS",
                    value: v.clone(),
                },
            )?),
            None => None,
        };

        Ok(Self {
            records,
            vectors,
            embeddings,
            encryption_secret: get("CONVO_ENCRYPTION_SECRET"),
            audio_root,
            speaker_threshold,
            scoring_workers,
        })
    }

    /// The encryption secret, or an error if it was not configured
    pub fn require_encryption_secret(&self) -> Result<&str, ConfigError> {
        self.encryption_secret
            .as_deref()
            .ok_or(ConfigError::Missing("CONVO_ENCRYPTION_SECRET"))
    }
}

/// ~/.convo
fn default_data_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(".convo"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_explicit_backends() {
        let config = CoreConfig::from_lookup(lookup(&[
            ("CONVO_RECORD_BACKEND", "memory"),
            ("CONVO_VECTOR_BACKEND", "qdrant"),
            ("QDRANT_URL", "http://localhost:6334"),
            ("CONVO_AUDIO_ROOT", "/tmp/audio"),
            ("CONVO_SPEAKER_THRESHOLD", "0.4"),
        ]))
        .unwrap();

        assert_eq!(config.records, RecordBackend::Memory);
        assert_eq!(
            config.vectors,
            VectorBackend::Qdrant {
                url: "http://localhost:6334".to_string(),
                collection: DEFAULT_COLLECTION.to_string(),
            }
        );
        assert_eq!(config.speaker_threshold, 0.4);
        assert!(config.encryption_secret.is_none());
        assert!(config.require_encryption_secret().is_err());
    }

    #[test]
    fn test_qdrant_requires_url() {
        let result = CoreConfig::from_lookup(lookup(&[
            ("CONVO_RECORD_BACKEND", "memory"),
            ("CONVO_VECTOR_BACKEND", "qdrant"),
            ("CONVO_AUDIO_ROOT", "/tmp/audio"),
        ]));
        assert!(matches!(result, Err(ConfigError::Missing("QDRANT_URL"))));
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let result = CoreConfig::from_lookup(lookup(&[
            ("CONVO_RECORD_BACKEND", "firestore"),
            ("CONVO_AUDIO_ROOT", "/tmp/audio"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_disabled_vectors_and_workers() {
        let config = CoreConfig::from_lookup(lookup(&[
            ("CONVO_RECORD_BACKEND", "memory"),
            ("CONVO_VECTOR_BACKEND", "none"),
            ("CONVO_AUDIO_ROOT", "/tmp/audio"),
            ("CONVO_SCORING_WORKERS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.vectors, VectorBackend::Disabled);
        assert_eq!(config.scoring_workers, Some(3));

        let bad = CoreConfig::from_lookup(lookup(&[
            ("CONVO_RECORD_BACKEND", "memory"),
            ("CONVO_VECTOR_BACKEND", "none"),
            ("CONVO_AUDIO_ROOT", "/tmp/audio"),
            ("CONVO_SCORING_WORKERS", "0"),
        ]));
        assert!(bad.is_err());
    }
}
