//! ============================================================================
//! Core Types - Conversations, transcripts and protection levels
//! ============================================================================
//! Shared data structures used by the codec, the record store, retrieval and
//! speaker classification.
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Per-record protection policy.
/// `Standard` records are compressed only; `Enhanced` records are compressed
/// and then encrypted with the owner's derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionLevel {
    #[default]
    Standard,
    Enhanced,
}

impl ProtectionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtectionLevel::Standard => "standard",
            ProtectionLevel::Enhanced => "enhanced",
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, ProtectionLevel::Enhanced)
    }
}

impl std::fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for ProtectionLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Ok(ProtectionLevel::Standard),
            "enhanced" => Ok(ProtectionLevel::Enhanced),
            _ => Err(CoreError::InvalidInput(format!(
                "Unknown protection level: {}",
                s
            ))),
        }
    }
}

/// A single diarized transcript segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    /// Diarization tag, e.g. "SPEAKER_00"
    pub speaker: String,
    pub speaker_id: u32,
    pub is_user: bool,
    pub person_id: Option<String>,
    /// Offset in seconds from the start of the recording
    pub start: f64,
    pub end: f64,
}

impl TranscriptSegment {
    pub fn new(text: impl Into<String>, speaker: impl Into<String>, start: f64, end: f64) -> Self {
        let speaker = speaker.into();
        let speaker_id = speaker_id_from_tag(&speaker);
        Self {
            text: text.into(),
            speaker,
            speaker_id,
            is_user: false,
            person_id: None,
            start,
            end,
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Apply a speaker classification to this segment
    pub fn apply_classification(&mut self, result: &ClassificationResult) {
        self.is_user = result.is_user;
        self.person_id = result.person_id.clone();
    }
}

/// "SPEAKER_03" -> 3. Unparseable tags map to 0.
pub fn speaker_id_from_tag(tag: &str) -> u32 {
    tag.rsplit('_')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Speaker attribution for one transcript segment.
/// At most one identity: either the owner (`is_user`) or a person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_user: bool,
    pub person_id: Option<String>,
}

impl ClassificationResult {
    pub fn unattributed() -> Self {
        Self::default()
    }

    pub fn user() -> Self {
        Self {
            is_user: true,
            person_id: None,
        }
    }

    pub fn person(person_id: impl Into<String>) -> Self {
        Self {
            is_user: false,
            person_id: Some(person_id.into()),
        }
    }
}

/// Finalized structured summary of a conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Structured {
    pub title: String,
    pub overview: String,
    pub emoji: String,
    pub category: String,
    pub action_items: Vec<String>,
    pub events: Vec<String>,
}

/// Versioned replacement for the free-form external data map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalData {
    pub version: u32,
    /// Integration that produced the conversation (e.g. "screenpipe")
    pub source: String,
    pub status: ExternalStatus,
    /// Identifier on the external side
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStatus {
    Pending,
    Synced,
    Failed,
}

/// A conversation in its decoded, in-memory form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub owner_id: String,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub structured: Structured,
    pub transcript_segments: Vec<TranscriptSegment>,
    pub protection_level: ProtectionLevel,
    pub discarded: bool,
    pub language: String,
    pub source: String,
    pub external_data: Option<ExternalData>,
}

impl Conversation {
    /// Create a new conversation with a random id
    pub fn new(owner_id: impl Into<String>, segments: Vec<TranscriptSegment>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            finished_at: None,
            structured: Structured::default(),
            transcript_segments: segments,
            protection_level: ProtectionLevel::Standard,
            discarded: false,
            language: "en".to_string(),
            source: "friend".to_string(),
            external_data: None,
        }
    }

    pub fn with_protection(mut self, level: ProtectionLevel) -> Self {
        self.protection_level = level;
        self
    }

    pub fn with_structured(mut self, structured: Structured) -> Self {
        self.structured = structured;
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Plain-text transcript, one "speaker: text" line per segment
    pub fn transcript_text(&self) -> String {
        self.transcript_segments
            .iter()
            .map(|s| {
                let who = if s.is_user {
                    "User".to_string()
                } else if let Some(person) = &s.person_id {
                    person.clone()
                } else {
                    format!("Speaker {}", s.speaker_id)
                };
                format!("{}: {}", who, s.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A memory (fact) extracted from a conversation. `content` is a protected field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFact {
    pub id: String,
    pub owner_id: String,
    pub conversation_id: Option<String>,
    pub content: String,
    pub category: String,
    pub created_at: i64,
    pub protection_level: ProtectionLevel,
    pub reviewed: bool,
    pub deleted: bool,
}

impl MemoryFact {
    pub fn new(owner_id: impl Into<String>, content: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            conversation_id: None,
            content: content.into(),
            category: category.into(),
            created_at: chrono::Utc::now().timestamp(),
            protection_level: ProtectionLevel::Standard,
            reviewed: false,
            deleted: false,
        }
    }
}

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Vector(#[from] crate::vector::VectorStoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_level_parsing() {
        assert_eq!("standard".parse::<ProtectionLevel>().unwrap(), ProtectionLevel::Standard);
        assert_eq!("Enhanced".parse::<ProtectionLevel>().unwrap(), ProtectionLevel::Enhanced);
        assert!("secret".parse::<ProtectionLevel>().is_err());
        assert_eq!(ProtectionLevel::default(), ProtectionLevel::Standard);
    }

    #[test]
    fn test_protection_level_serde() {
        let json = serde_json::to_string(&ProtectionLevel::Enhanced).unwrap();
        assert_eq!(json, "\"enhanced\"");
    }

    #[test]
    fn test_speaker_id_from_tag() {
        assert_eq!(speaker_id_from_tag("SPEAKER_03"), 3);
        assert_eq!(speaker_id_from_tag("SPEAKER_10"), 10);
        assert_eq!(speaker_id_from_tag("narrator"), 0);
    }

    #[test]
    fn test_apply_classification() {
        let mut segment = TranscriptSegment::new("hi", "SPEAKER_01", 0.0, 4.0);
        segment.apply_classification(&ClassificationResult::person("p-1"));
        assert!(!segment.is_user);
        assert_eq!(segment.person_id.as_deref(), Some("p-1"));

        segment.apply_classification(&ClassificationResult::user());
        assert!(segment.is_user);
        assert!(segment.person_id.is_none());
    }

    #[test]
    fn test_transcript_text() {
        let mut a = TranscriptSegment::new("hello", "SPEAKER_00", 0.0, 1.0);
        a.is_user = true;
        let b = TranscriptSegment::new("hey", "SPEAKER_01", 1.0, 2.0);
        let conversation = Conversation::new("u1", vec![a, b]);
        assert_eq!(conversation.transcript_text(), "User: hello\nSpeaker 1: hey");
    }
}
