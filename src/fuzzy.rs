//! Deterministic fuzzy scorer used by EntityResolvers (spec §4.5, §9).
//!
//! The spec requires only that implementations produce a deterministic
//! score in `[0, 1]` over a query and an entity's searchable fields, with
//! a default floor of 0.3; algorithm choice (n-gram, normalized
//! Levenshtein, token-Jaccard) is explicitly left open. This implementation
//! combines a normalized-substring bonus with token-overlap (Jaccard),
//! which handles both "contains the same words in a different order" and
//! "one is a substring of the other" without needing an edit-distance
//! table per comparison.

use std::collections::HashSet;

/// Normalized-substring + token-overlap scorer with a configurable floor.
#[derive(Debug, Clone, Copy)]
pub struct FuzzyMatcher {
    min_score: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self { min_score: 0.3 }
    }
}

impl FuzzyMatcher {
    /// Build a matcher with an explicit floor (spec `FUZZY_MATCH_MIN`).
    pub fn with_threshold(min_score: f64) -> Self {
        Self { min_score }
    }

    /// The configured floor.
    pub fn threshold(&self) -> f64 {
        self.min_score
    }

    /// Score `query` against a single field, normalized to `[0, 1]`.
    pub fn score_field(&self, query: &str, field: &str) -> f64 {
        let q = normalize(query);
        let f = normalize(field);
        if q.is_empty() || f.is_empty() {
            return 0.0;
        }
        if q == f {
            return 1.0;
        }

        let substring_score = if f.contains(&q) || q.contains(&f) {
            let shorter = q.len().min(f.len()) as f64;
            let longer = q.len().max(f.len()) as f64;
            0.5 + 0.5 * (shorter / longer)
        } else {
            0.0
        };

        let token_score = token_jaccard(&q, &f);

        substring_score.max(token_score)
    }

    /// Score `query` against several searchable fields, taking the best
    /// match (spec §4.5 step 4: score over `{summary, description}`).
    pub fn score_fields(&self, query: &str, fields: &[&str]) -> f64 {
        fields
            .iter()
            .map(|f| self.score_field(query, f))
            .fold(0.0_f64, f64::max)
    }

    /// True when `score_fields` clears the configured floor.
    pub fn matches(&self, query: &str, fields: &[&str]) -> bool {
        self.score_fields(query, fields) >= self.min_score
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_scores_one() {
        let m = FuzzyMatcher::default();
        assert_eq!(m.score_field("Meeting with Dan", "meeting with dan"), 1.0);
    }

    #[test]
    fn substring_scores_above_floor() {
        let m = FuzzyMatcher::default();
        let score = m.score_field("Dan", "Meeting with Dan about Q3");
        assert!(score > m.threshold(), "score was {score}");
    }

    #[test]
    fn disjoint_strings_score_zero() {
        let m = FuzzyMatcher::default();
        assert_eq!(m.score_field("grocery run", "quarterly board review"), 0.0);
    }

    #[test]
    fn token_overlap_beats_floor_with_reordered_words() {
        let m = FuzzyMatcher::default();
        let score = m.score_field("dan meeting", "meeting with dan");
        assert!(m.matches("dan meeting", &["meeting with dan"]));
        assert!(score >= m.threshold());
    }

    #[test]
    fn best_of_multiple_fields_is_used() {
        let m = FuzzyMatcher::default();
        let score = m.score_fields("dan", &["unrelated", "call with dan"]);
        assert!(score > 0.0);
    }
}
