//! ============================================================================
//! Metadata Filters - Engine-neutral predicate over embedding metadata
//! ============================================================================
//! Each engine translates the tree itself: Qdrant into `Filter`/`Condition`,
//! the embedded engine by evaluating `matches` directly.
//! ============================================================================

use serde::{Deserialize, Serialize};

use super::EmbeddingMetadata;

/// Filterable metadata fields. `as_str` is the payload key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataField {
    OwnerId,
    ConversationId,
    People,
    PeopleMentioned,
    Topics,
    Entities,
    Dates,
    CreatedAt,
}

impl MetadataField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::OwnerId => "owner_id",
            MetadataField::ConversationId => "conversation_id",
            MetadataField::People => "people",
            MetadataField::PeopleMentioned => "people_mentioned",
            MetadataField::Topics => "topics",
            MetadataField::Entities => "entities",
            MetadataField::Dates => "dates",
            MetadataField::CreatedAt => "created_at",
        }
    }

    /// Keyword fields, scalar or list
    pub const KEYWORDS: [MetadataField; 7] = [
        MetadataField::OwnerId,
        MetadataField::ConversationId,
        MetadataField::People,
        MetadataField::PeopleMentioned,
        MetadataField::Topics,
        MetadataField::Entities,
        MetadataField::Dates,
    ];
}

/// Predicate tree over `EmbeddingMetadata`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataFilter {
    /// Every child matches (empty: always true)
    All(Vec<MetadataFilter>),
    /// At least one child matches (empty: always true)
    Any(Vec<MetadataFilter>),
    /// Scalar field equals, or list field contains, the value
    Eq(MetadataField, String),
    /// Field (scalar or list) contains any of the values
    AnyOf(MetadataField, Vec<String>),
    /// Integer field within the inclusive bounds; a missing bound is open
    Range {
        field: MetadataField,
        gte: Option<i64>,
        lte: Option<i64>,
    },
}

impl MetadataFilter {
    pub fn owner(owner_id: impl Into<String>) -> Self {
        MetadataFilter::Eq(MetadataField::OwnerId, owner_id.into())
    }

    pub fn conversation(conversation_id: impl Into<String>) -> Self {
        MetadataFilter::Eq(MetadataField::ConversationId, conversation_id.into())
    }

    pub fn created_between(gte: Option<i64>, lte: Option<i64>) -> Self {
        MetadataFilter::Range {
            field: MetadataField::CreatedAt,
            gte,
            lte,
        }
    }

    /// Evaluate against one record's metadata
    pub fn matches(&self, metadata: &EmbeddingMetadata) -> bool {
        match self {
            MetadataFilter::All(children) => children.iter().all(|f| f.matches(metadata)),
            MetadataFilter::Any(children) => {
                children.is_empty() || children.iter().any(|f| f.matches(metadata))
            }
            MetadataFilter::Eq(field, value) => {
                text_values(metadata, *field).contains(&value.as_str())
            }
            MetadataFilter::AnyOf(field, values) => {
                let present = text_values(metadata, *field);
                values.iter().any(|v| present.contains(&v.as_str()))
            }
            MetadataFilter::Range { field, gte, lte } => match int_value(metadata, *field) {
                Some(value) => {
                    gte.map_or(true, |lo| value >= lo) && lte.map_or(true, |hi| value <= hi)
                }
                None => false,
            },
        }
    }
}

fn text_values(metadata: &EmbeddingMetadata, field: MetadataField) -> Vec<&str> {
    fn list(items: &[String]) -> Vec<&str> {
        items.iter().map(String::as_str).collect()
    }
    match field {
        MetadataField::OwnerId => vec![metadata.owner_id.as_str()],
        MetadataField::ConversationId => vec![metadata.conversation_id.as_str()],
        MetadataField::People => list(&metadata.people),
        MetadataField::PeopleMentioned => list(&metadata.people_mentioned),
        MetadataField::Topics => list(&metadata.topics),
        MetadataField::Entities => list(&metadata.entities),
        MetadataField::Dates => list(&metadata.dates),
        MetadataField::CreatedAt => vec![],
    }
}

fn int_value(metadata: &EmbeddingMetadata, field: MetadataField) -> Option<i64> {
    match field {
        MetadataField::CreatedAt => Some(metadata.created_at),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> EmbeddingMetadata {
        EmbeddingMetadata {
            owner_id: "alice".to_string(),
            conversation_id: "c1".to_string(),
            people: vec!["Bob".to_string()],
            people_mentioned: vec!["Carol".to_string()],
            topics: vec!["sports".to_string(), "travel".to_string()],
            entities: vec![],
            dates: vec![],
            created_at: 1_000,
        }
    }

    #[test]
    fn test_scalar_and_list_equality() {
        let m = metadata();
        assert!(MetadataFilter::owner("alice").matches(&m));
        assert!(!MetadataFilter::owner("bob").matches(&m));
        assert!(MetadataFilter::Eq(MetadataField::Topics, "travel".into()).matches(&m));
    }

    #[test]
    fn test_any_of() {
        let m = metadata();
        let filter = MetadataFilter::AnyOf(MetadataField::Topics, vec!["cooking".into(), "sports".into()]);
        assert!(filter.matches(&m));
        assert!(!MetadataFilter::AnyOf(MetadataField::Entities, vec!["NASA".into()]).matches(&m));
        assert!(!MetadataFilter::AnyOf(MetadataField::Topics, vec![]).matches(&m));
    }

    #[test]
    fn test_range_bounds() {
        let m = metadata();
        assert!(MetadataFilter::created_between(Some(999), Some(1_001)).matches(&m));
        assert!(MetadataFilter::created_between(Some(1_000), Some(1_000)).matches(&m));
        assert!(MetadataFilter::created_between(None, Some(1_000)).matches(&m));
        assert!(!MetadataFilter::created_between(Some(1_001), None).matches(&m));
        assert!(!MetadataFilter::Range {
            field: MetadataField::Topics,
            gte: None,
            lte: None
        }
        .matches(&m));
    }

    #[test]
    fn test_nested_combinators() {
        let m = metadata();
        let filter = MetadataFilter::All(vec![
            MetadataFilter::owner("alice"),
            MetadataFilter::Any(vec![
                MetadataFilter::AnyOf(MetadataField::People, vec!["Dave".into()]),
                MetadataFilter::AnyOf(MetadataField::Topics, vec!["sports".into()]),
            ]),
        ]);
        assert!(filter.matches(&m));

        let miss = MetadataFilter::All(vec![
            MetadataFilter::owner("alice"),
            MetadataFilter::Any(vec![MetadataFilter::AnyOf(
                MetadataField::People,
                vec!["Dave".into()],
            )]),
        ]);
        assert!(!miss.matches(&m));
        assert!(MetadataFilter::All(vec![]).matches(&m));
        assert!(MetadataFilter::Any(vec![]).matches(&m));
    }
}
