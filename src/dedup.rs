//! Duplicate lookup for inbound emails against previously handled ones.
//!
//! Decides whether a new message belongs to an existing task (update) or
//! should open a new one. Entries are compared by text similarity through the
//! same pluggable scorer used for address grouping.

use crate::normalize::comparison_text;
use crate::similarity::SimilarityScorer;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    pub id: String,
    pub score: f64,
}

struct Entry {
    id: String,
    text: String,
}

pub struct DuplicateIndex {
    scorer: Box<dyn SimilarityScorer>,
    threshold: f64,
    entries: Vec<Entry>,
}

impl DuplicateIndex {
    pub fn new(scorer: Box<dyn SimilarityScorer>, threshold: f64) -> Self {
        Self {
            scorer,
            threshold,
            entries: Vec::new(),
        }
    }

    /// Remember a handled item. Blank texts are ignored.
    pub fn insert(&mut self, id: impl Into<String>, text: &str) {
        let text = comparison_text(text);
        if text.is_empty() {
            return;
        }
        self.entries.push(Entry { id: id.into(), text });
    }

    /// Best-scoring entry at or above the threshold; ties go to the earliest insert.
    pub fn find_duplicate(&self, text: &str) -> Option<DuplicateMatch> {
        let text = comparison_text(text);
        if text.is_empty() {
            return None;
        }

        let mut best: Option<DuplicateMatch> = None;
        for entry in &self.entries {
            let score = self.scorer.similarity(&text, &entry.text);
            debug!("Duplicate candidate '{}' scored {:.3}", entry.id, score);
            if score < self.threshold {
                continue;
            }
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(DuplicateMatch {
                    id: entry.id.clone(),
                    score,
                });
            }
        }

        if let Some(ref m) = best {
            info!("Duplicate detected: matches '{}' (similarity: {:.2})", m.id, m.score);
        }
        best
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
