//! Pluggable string similarity scoring.
//!
//! Grouping logic only depends on [`SimilarityScorer`], so the comparison
//! algorithm can be chosen per client profile via [`ScorerKind`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Scores two strings in `[0, 1]`, where 1 means identical.
pub trait SimilarityScorer: Send + Sync {
    fn name(&self) -> &str;
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// `2 * LCS(a, b) / (|a| + |b|)` over characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct LcsRatio;

impl SimilarityScorer for LcsRatio {
    fn name(&self) -> &str {
        "lcs_ratio"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let total = a.len() + b.len();
        if total == 0 {
            return 1.0;
        }
        2.0 * lcs_len(&a, &b) as f64 / total as f64
    }
}

/// Longest common subsequence length, single-row DP.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut row = vec![0usize; b.len() + 1];
    for ca in a {
        let mut diag = 0;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diag + 1
            } else {
                above.max(row[j])
            };
            diag = above;
        }
    }
    row[b.len()]
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedLevenshtein;

impl SimilarityScorer for NormalizedLevenshtein {
    fn name(&self) -> &str {
        "levenshtein"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(a, b)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinkler;

impl SimilarityScorer for JaroWinkler {
    fn name(&self) -> &str {
        "jaro_winkler"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        strsim::jaro_winkler(a, b)
    }
}

/// Jaccard overlap of whitespace tokens; insensitive to word order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSet;

impl SimilarityScorer for TokenSet {
    fn name(&self) -> &str {
        "token_set"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        let left: HashSet<&str> = a.split_whitespace().collect();
        let right: HashSet<&str> = b.split_whitespace().collect();
        let union = left.union(&right).count();
        if union == 0 {
            return 1.0;
        }
        left.intersection(&right).count() as f64 / union as f64
    }
}

/// Scorer selection as it appears in pipeline configs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    #[default]
    LcsRatio,
    Levenshtein,
    JaroWinkler,
    TokenSet,
}

impl ScorerKind {
    pub fn build(self) -> Box<dyn SimilarityScorer> {
        match self {
            Self::LcsRatio => Box::new(LcsRatio),
            Self::Levenshtein => Box::new(NormalizedLevenshtein),
            Self::JaroWinkler => Box::new(JaroWinkler),
            Self::TokenSet => Box::new(TokenSet),
        }
    }
}
