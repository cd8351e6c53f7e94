//! Overlap re-ranking of similarity candidates.

use crate::vector::{EmbeddingMetadata, VectorMatch};

use super::StructuredFilters;

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub conversation_id: String,
    pub similarity: f32,
    /// Query values found in the candidate's metadata
    pub overlap: usize,
}

/// Query topics found in topics, plus query entities found in entities,
/// plus query people found in people_mentioned
pub fn overlap_score(filters: &StructuredFilters, metadata: &EmbeddingMetadata) -> usize {
    let hits = |wanted: &[String], present: &[String]| {
        wanted.iter().filter(|w| present.contains(w)).count()
    };

    hits(&filters.topics, &metadata.topics)
        + hits(&filters.entities, &metadata.entities)
        + hits(&filters.people, &metadata.people_mentioned)
}

/// Stable sort by overlap, descending. Equal overlap keeps the incoming
/// similarity order.
pub fn rerank(matches: Vec<VectorMatch>, filters: &StructuredFilters, limit: usize) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = matches
        .into_iter()
        .map(|m| RankedCandidate {
            overlap: overlap_score(filters, &m.metadata),
            conversation_id: m.metadata.conversation_id,
            similarity: m.score,
        })
        .collect();

    ranked.sort_by(|a, b| b.overlap.cmp(&a.overlap));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: f32, topics: &[&str], entities: &[&str], mentioned: &[&str]) -> VectorMatch {
        let mut metadata = EmbeddingMetadata::new("alice", id, 0);
        metadata.topics = topics.iter().map(|s| s.to_string()).collect();
        metadata.entities = entities.iter().map(|s| s.to_string()).collect();
        metadata.people_mentioned = mentioned.iter().map(|s| s.to_string()).collect();
        VectorMatch {
            key: metadata.key(),
            score,
            metadata,
            vector: None,
        }
    }

    fn filters() -> StructuredFilters {
        StructuredFilters {
            people: vec!["Carol".into()],
            topics: vec!["sports".into()],
            entities: vec!["Lakers".into()],
        }
    }

    #[test]
    fn test_overlap_promotes_over_similarity() {
        // Similarity order A, B, C with overlaps 0, 2, 1
        let matches = vec![
            candidate("A", 0.9, &[], &[], &[]),
            candidate("B", 0.8, &["sports"], &["Lakers"], &[]),
            candidate("C", 0.7, &[], &[], &["Carol"]),
        ];
        let ranked = rerank(matches, &filters(), 10);
        let ids: Vec<&str> = ranked.iter().map(|c| c.conversation_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C", "A"]);
        assert_eq!(ranked[0].overlap, 2);
    }

    #[test]
    fn test_people_score_against_mentions_only() {
        let mut m = candidate("A", 0.9, &[], &[], &[]);
        m.metadata.people = vec!["Carol".to_string()];
        assert_eq!(overlap_score(&filters(), &m.metadata), 0);
    }

    #[test]
    fn test_ties_keep_similarity_order() {
        let matches = vec![
            candidate("A", 0.9, &["sports"], &[], &[]),
            candidate("B", 0.8, &[], &["Lakers"], &[]),
            candidate("C", 0.7, &[], &[], &[]),
        ];
        let ranked = rerank(matches, &filters(), 10);
        let ids: Vec<&str> = ranked.iter().map(|c| c.conversation_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_empty_filters_are_a_no_op() {
        let matches = vec![
            candidate("A", 0.9, &["sports"], &[], &[]),
            candidate("B", 0.8, &["sports"], &["Lakers"], &["Carol"]),
        ];
        let ranked = rerank(matches, &StructuredFilters::default(), 10);
        let ids: Vec<&str> = ranked.iter().map(|c| c.conversation_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn test_truncates_to_limit() {
        let matches = vec![
            candidate("A", 0.9, &[], &[], &[]),
            candidate("B", 0.8, &["sports"], &[], &[]),
        ];
        let ranked = rerank(matches, &filters(), 1);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].conversation_id, "B");
    }
}
