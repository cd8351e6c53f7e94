//! ============================================================================
//! Retrieval - Filtered similarity search over conversations
//! ============================================================================
//! Flow for one request:
//! 1. owner + date filter, plus an OR over the structured categories
//! 2. similarity query with a large candidate pool
//! 3. nothing found and categories were applied: retry with owner + date
//!    only and a small pool
//! 4. stable re-rank by category overlap, truncate to the limit
//! ============================================================================

mod planner;
mod rerank;

pub use planner::{RetrievalError, RetrievalPlanner};
pub use rerank::{overlap_score, rerank, RankedCandidate};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candidate pool for the structured (primary) attempt
pub const PRIMARY_CANDIDATE_POOL: usize = 10_000;

/// Candidate pool for the relaxed (fallback) attempt
pub const FALLBACK_CANDIDATE_POOL: usize = 20;

pub const DEFAULT_LIMIT: usize = 5;

/// What to search with
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    /// Embedded through the configured `Embedder`
    Text(String),
    Vector(Vec<f32>),
}

/// Structured categories; a conversation matches when it shares at least
/// one value with any non-empty category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredFilters {
    pub people: Vec<String>,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
}

impl StructuredFilters {
    pub fn is_empty(&self) -> bool {
        self.people.is_empty() && self.topics.is_empty() && self.entities.is_empty()
    }
}

/// Inclusive creation-time window. A missing bound is open on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Unix-second bounds to filter on, or None when nothing constrains.
    /// An inverted window (start after end) constrains nothing.
    pub fn bounds(&self) -> Option<(Option<i64>, Option<i64>)> {
        let start = self.start.map(|d| d.timestamp());
        let end = self.end.map(|d| d.timestamp());
        match (start, end) {
            (None, None) => None,
            (Some(s), Some(e)) if s > e => None,
            bounds => Some(bounds),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub owner_id: String,
    pub query: SearchQuery,
    pub filters: StructuredFilters,
    pub date_range: DateRange,
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(owner_id: impl Into<String>, query: SearchQuery) -> Self {
        Self {
            owner_id: owner_id.into(),
            query,
            filters: StructuredFilters::default(),
            date_range: DateRange::unbounded(),
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_filters(mut self, filters: StructuredFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = date_range;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Everything a search produced, for diagnostics and the CLI
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalReport {
    /// Final ranked ids, at most `limit`
    pub conversation_ids: Vec<String>,
    /// Ranked candidates behind the ids
    pub candidates: Vec<RankedCandidate>,
    /// The structured filters were dropped for a second attempt
    pub fallback_used: bool,
    /// Matches returned by the first attempt
    pub primary_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    #[test]
    fn test_date_range_bounds() {
        assert_eq!(DateRange::unbounded().bounds(), None);
        assert_eq!(DateRange::between(at(10), at(20)).bounds(), Some((Some(10), Some(20))));
        assert_eq!(DateRange::between(at(20), at(10)).bounds(), None);

        let open_end = DateRange {
            start: Some(at(10)),
            end: None,
        };
        assert_eq!(open_end.bounds(), Some((Some(10), None)));
    }

    #[test]
    fn test_structured_filters_empty() {
        assert!(StructuredFilters::default().is_empty());
        let filters = StructuredFilters {
            topics: vec!["sports".into()],
            ..Default::default()
        };
        assert!(!filters.is_empty());
    }
}
