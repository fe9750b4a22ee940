use crate::ReferenceTable;
use common::geometry::{cosine_similarity_with_norms, l2_norm};
use serde::Serialize;
use tracing::{debug, trace, warn};

pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.75;
pub const DEFAULT_EARLY_STOP: f32 = 0.99;

/// Display label for crops that did not reach the match threshold.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Best category, only set when `is_match`.
    pub category: Option<String>,
    pub similarity: f32,
    pub is_match: bool,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            category: None,
            similarity: 0.0,
            is_match: false,
        }
    }

    pub fn label(&self) -> &str {
        self.category.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// Nearest-category search by cosine similarity.
///
/// The scan stops at the first improvement reaching `early_stop`, so with
/// early stop enabled the result is the first "good enough" reference in
/// table order rather than the global maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddingMatcher {
    pub threshold: f32,
    pub early_stop: Option<f32>,
}

impl Default for EmbeddingMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            early_stop: Some(DEFAULT_EARLY_STOP),
        }
    }
}

impl EmbeddingMatcher {
    pub fn new(threshold: f32, early_stop: Option<f32>) -> Self {
        Self {
            threshold,
            early_stop,
        }
    }

    pub fn find_best_match(&self, query: &[f32], table: &ReferenceTable) -> MatchResult {
        if table.is_empty() {
            warn!("No reference embeddings loaded");
            return MatchResult::no_match();
        }

        if query.len() != table.dimension() {
            warn!(
                expected = table.dimension(),
                actual = query.len(),
                "Query embedding size mismatch"
            );
        }

        let query_norm = l2_norm(query);
        if query_norm == 0.0 {
            warn!("Zero-norm query embedding");
        }

        // Starting at 0 means negative similarities never select a category.
        let mut best_similarity = 0.0f32;
        let mut best_category: Option<&str> = None;
        let mut comparisons = 0usize;

        'scan: for category in table.categories() {
            for reference in category.embeddings() {
                comparisons += 1;
                let similarity = cosine_similarity_with_norms(
                    query,
                    query_norm,
                    reference.values(),
                    reference.norm(),
                );

                if similarity > best_similarity {
                    best_similarity = similarity;
                    best_category = Some(category.name());

                    if self.early_stop.is_some_and(|stop| similarity >= stop) {
                        trace!(similarity, "Early stop on excellent match");
                        break 'scan;
                    }
                }
            }
        }

        // A non-positive threshold must not turn "nothing selected" into a match.
        let is_match = best_category.is_some() && best_similarity >= self.threshold;
        debug!(
            comparisons,
            best = best_category.unwrap_or(UNKNOWN_LABEL),
            similarity = best_similarity,
            is_match,
            "Embedding match"
        );

        MatchResult {
            category: best_category.filter(|_| is_match).map(str::to_string),
            similarity: best_similarity,
            is_match,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit vector at angle `theta` (radians) in the x/y plane.
    fn at_angle(theta: f32) -> Vec<f32> {
        vec![theta.cos(), theta.sin()]
    }

    #[test]
    fn test_match_above_threshold() {
        let table = ReferenceTable::from_categories(2, [("A", vec![vec![1.0, 0.0]])]);
        // cos(theta) = 0.95
        let query = at_angle(0.95f32.acos());

        let result = EmbeddingMatcher::default().find_best_match(&query, &table);
        assert_eq!(result.category.as_deref(), Some("A"));
        assert!((result.similarity - 0.95).abs() < 1e-5);
        assert!(result.is_match);
    }

    #[test]
    fn test_below_threshold_is_unknown() {
        let table = ReferenceTable::from_categories(2, [("A", vec![vec![1.0, 0.0]])]);
        let query = at_angle(0.50f32.acos());

        let result = EmbeddingMatcher::default().find_best_match(&query, &table);
        assert_eq!(result.category, None);
        assert!((result.similarity - 0.50).abs() < 1e-5);
        assert!(!result.is_match);
        assert_eq!(result.label(), UNKNOWN_LABEL);
    }

    #[test]
    fn test_empty_table() {
        let table = ReferenceTable::from_categories::<_, String>(2, Vec::new());
        let result = EmbeddingMatcher::default().find_best_match(&[1.0, 0.0], &table);
        assert_eq!(result, MatchResult::no_match());
    }

    #[test]
    fn test_best_category_wins() {
        let table = ReferenceTable::from_categories(
            2,
            [
                ("far", vec![vec![0.0, 1.0]]),
                ("near", vec![vec![1.0, 0.1], vec![-1.0, 0.0]]),
            ],
        );
        let result = EmbeddingMatcher::default().find_best_match(&[1.0, 0.0], &table);
        assert_eq!(result.category.as_deref(), Some("near"));
    }

    #[test]
    fn test_negative_similarity_never_selects() {
        let table = ReferenceTable::from_categories(2, [("opposite", vec![vec![-1.0, 0.0]])]);
        let matcher = EmbeddingMatcher::new(-2.0, None);
        let result = matcher.find_best_match(&[1.0, 0.0], &table);
        assert_eq!(result.similarity, 0.0);
        assert_eq!(result.category, None, "No category reached a positive similarity");
        assert!(!result.is_match);
    }

    #[test]
    fn test_zero_threshold_requires_a_selected_category() {
        let table = ReferenceTable::from_categories(2, [("orthogonal", vec![vec![0.0, 1.0]])]);
        let result = EmbeddingMatcher::new(0.0, None).find_best_match(&[1.0, 0.0], &table);
        assert_eq!(result, MatchResult::no_match());
        assert_eq!(result.is_match, result.category.is_some());
    }

    #[test]
    fn test_early_stop_returns_first_excellent_match() {
        // "first" clears the early-stop bar, "second" is an exact match later in order.
        let first = at_angle(0.995f32.acos());
        let table = ReferenceTable::from_categories(
            2,
            [("first", vec![first]), ("second", vec![vec![1.0, 0.0]])],
        );

        let result = EmbeddingMatcher::default().find_best_match(&[1.0, 0.0], &table);
        assert_eq!(result.category.as_deref(), Some("first"));
        assert!(result.similarity < 1.0);

        let exhaustive = EmbeddingMatcher::new(DEFAULT_MATCH_THRESHOLD, None);
        let result = exhaustive.find_best_match(&[1.0, 0.0], &table);
        assert_eq!(result.category.as_deref(), Some("second"));
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_norm_vectors_score_zero() {
        let table = ReferenceTable::from_categories(
            2,
            [("zero", vec![vec![0.0, 0.0]]), ("unit", vec![vec![0.0, 1.0]])],
        );
        let matcher = EmbeddingMatcher::default();

        let result = matcher.find_best_match(&[0.0, 0.0], &table);
        assert_eq!(result, MatchResult::no_match());

        let result = matcher.find_best_match(&[0.0, 2.0], &table);
        assert_eq!(result.category.as_deref(), Some("unit"));
    }

    #[test]
    fn test_query_size_mismatch_does_not_match() {
        let table = ReferenceTable::from_categories(2, [("A", vec![vec![1.0, 0.0]])]);
        let result = EmbeddingMatcher::default().find_best_match(&[1.0, 0.0, 0.0], &table);
        assert!(!result.is_match);
        assert_eq!(result.similarity, 0.0);
    }
}
