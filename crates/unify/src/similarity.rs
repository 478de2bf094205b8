//! Lexical similarity between two comparison keys.
//!
//! `score` is the max of token overlap (robust to reordering) and a
//! normalized edit-distance ratio over the joined string (robust to one side
//! carrying an extra word). No learned parameters.

use serde::Serialize;
use strsim::normalized_levenshtein;

use crate::model::ComparisonKey;

/// `|a ∩ b| / max(|a|, |b|)` over token sets.
pub fn token_overlap(a: &ComparisonKey, b: &ComparisonKey) -> f64 {
    let larger = a.normalized_tokens.len().max(b.normalized_tokens.len());
    if larger == 0 {
        return 0.0;
    }
    let shared = a
        .normalized_tokens
        .intersection(&b.normalized_tokens)
        .count();
    shared as f64 / larger as f64
}

/// 1 - levenshtein / max_len over the normalized strings. 0 when either is empty.
pub fn sequence_ratio(a: &ComparisonKey, b: &ComparisonKey) -> f64 {
    if a.normalized_string.is_empty() || b.normalized_string.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(&a.normalized_string, &b.normalized_string)
}

pub fn score(a: &ComparisonKey, b: &ComparisonKey) -> f64 {
    token_overlap(a, b).max(sequence_ratio(a, b)).clamp(0.0, 1.0)
}

/// Both component scores, for the `score` CLI command and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub token_overlap: f64,
    pub sequence_ratio: f64,
    pub score: f64,
}

pub fn explain(a: &ComparisonKey, b: &ComparisonKey) -> ScoreBreakdown {
    let token_overlap = token_overlap(a, b);
    let sequence_ratio = sequence_ratio(a, b);
    ScoreBreakdown {
        token_overlap,
        sequence_ratio,
        score: token_overlap.max(sequence_ratio).clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Normalizer;

    fn key(name: &str) -> ComparisonKey {
        Normalizer::default().normalize(name, "test").unwrap()
    }

    #[test]
    fn identical_after_normalization() {
        let a = key("FP-30X");
        let b = key("FP 30 X");
        assert_eq!(token_overlap(&a, &b), 1.0);
        assert_eq!(score(&a, &b), 1.0);
    }

    #[test]
    fn unrelated_scores_low() {
        let s = score(&key("TD-17KVX"), &key("Completely Unrelated Product"));
        assert!(s < 0.4, "score was {s}");
    }

    #[test]
    fn reordering_handled_by_overlap() {
        let a = key("Piano Stage RD-88");
        let b = key("RD-88 Stage Piano");
        assert_eq!(token_overlap(&a, &b), 1.0);
        assert!(sequence_ratio(&a, &b) < 1.0);
        assert_eq!(score(&a, &b), 1.0);
    }

    #[test]
    fn overlap_uses_larger_side() {
        let a = key("Katana 50 MkII");
        let b = key("Katana 50");
        // {katana, 50, mkii} vs {katana, 50}
        assert!((token_overlap(&a, &b) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn extra_suffix_handled_by_sequence_ratio() {
        let a = key("Spider V 120");
        let b = key("Spider V120s");
        let breakdown = explain(&a, &b);
        assert!(breakdown.sequence_ratio > breakdown.token_overlap);
        assert_eq!(breakdown.score, breakdown.sequence_ratio);
    }

    #[test]
    fn symmetric_and_bounded() {
        let pairs = [("GT-1000", "GT 1000 Core"), ("SY-1", "SY-300"), ("abc", "xyz")];
        for (x, y) in pairs {
            let (a, b) = (key(x), key(y));
            let s = score(&a, &b);
            assert_eq!(s, score(&b, &a));
            assert!((0.0..=1.0).contains(&s));
        }
    }
}
