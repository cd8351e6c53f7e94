//! ============================================================================
//! CONVO-CORE: Conversation protection & retrieval
//! ============================================================================
//! Backend logic for the wearable conversation service:
//! - Per-owner transcript compression and AES-256-GCM encryption
//! - Record persistence behind a narrow store interface (redb / memory)
//! - Conversation embeddings in Qdrant or an embedded exact index
//! - Filtered retrieval with fallback and overlap re-ranking
//! - Speaker attribution of transcript segments from voice samples
//! ============================================================================

pub mod config;
pub mod db;
pub mod embeddings;
pub mod protection;
pub mod retrieval;
pub mod service;
pub mod speaker;
pub mod types;
pub mod vector;

// Re-export main types for convenience
pub use types::*;
pub use config::{ConfigError, CoreConfig};
pub use db::{ConversationRepository, RecordStore};
pub use protection::ProtectionCodec;
pub use retrieval::{RetrievalPlanner, SearchRequest};
pub use service::{ConversationService, ConversationTags};
pub use speaker::SpeakerClassifier;
pub use vector::{VectorStore, VectorStoreError};
