//! Cosine-similarity top-1 classification against the taxonomy's embedded
//! labels, grounded directly on the teacher's
//! `core/knowledge_base.rs::cosine_similarity` plus `nlu/intent.rs`'s
//! best-score-tracking loop — generalized from 3 intent templates to an
//! arbitrary label set with a configurable threshold.
//!
//! Pure function of its inputs; no I/O, safe to call concurrently.

use crate::types::{EmbeddedLabel, Severity, UNCLASSIFIED_ROOT};

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// A classification result: either a matched label's dotted path and
/// severity, or the `UNCLASSIFIED` sentinel when the best score fell below
/// threshold.
pub struct Classification {
    pub root: String,
    pub leaf: String,
    pub severity: Option<Severity>,
    pub confidence: f32,
}

pub struct Classifier {
    threshold: f32,
}

impl Classifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Scores `query` against every label, picks the best, and applies the
    /// threshold. `labels` may be empty (an empty taxonomy), in which case
    /// every query is `UNCLASSIFIED`.
    pub fn classify(&self, query: &[f32], labels: &[EmbeddedLabel]) -> Classification {
        let mut best: Option<(&EmbeddedLabel, f32)> = None;
        for label in labels {
            let score = cosine_similarity(query, &label.embedding);
            if best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
                best = Some((label, score));
            }
        }

        match best {
            Some((label, score)) if score >= self.threshold => {
                let (root, leaf) = label
                    .path
                    .split_once('.')
                    .unwrap_or((label.path.as_str(), ""));
                Classification {
                    root: root.to_string(),
                    leaf: leaf.to_string(),
                    severity: Some(label.severity),
                    confidence: score,
                }
            }
            Some((_, score)) => Classification {
                root: UNCLASSIFIED_ROOT.to_string(),
                leaf: String::new(),
                severity: None,
                confidence: score,
            },
            None => Classification {
                root: UNCLASSIFIED_ROOT.to_string(),
                leaf: String::new(),
                severity: None,
                confidence: 0.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(path: &str, v: Vec<f32>) -> EmbeddedLabel {
        EmbeddedLabel {
            path: path.to_string(),
            severity: Severity::Error,
            embedding: v,
        }
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_handles_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn above_threshold_returns_matched_label() {
        let labels = vec![label("ERROR.connection_failure", vec![1.0, 0.0])];
        let classifier = Classifier::new(0.5);
        let result = classifier.classify(&[1.0, 0.0], &labels);
        assert_eq!(result.root, "ERROR");
        assert_eq!(result.leaf, "connection_failure");
        assert!(result.confidence >= 0.5);
    }

    #[test]
    fn below_threshold_returns_unclassified_sentinel_with_best_score() {
        let labels = vec![label("ERROR.connection_failure", vec![1.0, 0.0])];
        let classifier = Classifier::new(0.9);
        let result = classifier.classify(&[0.5, 0.5], &labels);
        assert_eq!(result.root, "UNCLASSIFIED");
        assert_eq!(result.leaf, "");
        assert!(result.severity.is_none());
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn empty_taxonomy_is_always_unclassified() {
        let classifier = Classifier::new(0.5);
        let result = classifier.classify(&[1.0, 0.0], &[]);
        assert_eq!(result.root, "UNCLASSIFIED");
        assert_eq!(result.confidence, 0.0);
    }
}
