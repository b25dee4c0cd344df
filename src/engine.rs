//! The orchestrator: wires the embedder, taxonomy, classifier, and
//! compactor into the two operations every caller actually needs
//! (spec.md §4.8).
//!
//! Grounded on the teacher's `core/mod.rs` engine shape — a single struct
//! owning every collaborator behind a trait object, with a fast path and a
//! batch path that share the same per-item finishing logic.

use chrono::Utc;

use crate::classifier::Classifier;
use crate::compactor::Compactor;
use crate::config::Verbosity;
use crate::embedder::Embed;
use crate::taxonomy::Taxonomy;
use crate::types::{CanonicalEvent, RawLog};

pub struct Engine {
    embedder: Box<dyn Embed>,
    taxonomy: Taxonomy,
    classifier: Classifier,
    compactor: Compactor,
    verbosity: Verbosity,
}

impl Engine {
    pub fn new(
        embedder: Box<dyn Embed>,
        taxonomy: Taxonomy,
        classifier: Classifier,
        compactor: Compactor,
        verbosity: Verbosity,
    ) -> Self {
        Self {
            embedder,
            taxonomy,
            classifier,
            compactor,
            verbosity,
        }
    }

    /// Processes a single [`RawLog`]. Whitespace-only `raw` text short-
    /// circuits to the `UNCLASSIFIED`/`empty_input` sentinel without
    /// invoking the embedder at all (spec.md §4.8, P2).
    pub fn process(&self, raw: RawLog) -> CanonicalEvent {
        if raw.raw.trim().is_empty() {
            return CanonicalEvent::empty_input(raw.timestamp, raw.raw);
        }
        let embedding = match self.embedder.embed(&raw.raw) {
            Ok(v) => v,
            Err(_) => return self.fallback(raw),
        };
        self.finish(raw, &embedding)
    }

    /// Processes a batch. Empty-input entries are pre-scanned out before
    /// the embedder ever sees them, so a batch that is entirely blank
    /// lines never triggers a model call (spec.md §4.8, P2/P3) — the
    /// embedder is invoked at most once, over exactly the non-empty
    /// subset, and results are mapped back to their original index.
    pub fn process_batch(&self, raws: Vec<RawLog>) -> Vec<CanonicalEvent> {
        let mut results: Vec<Option<CanonicalEvent>> = Vec::with_capacity(raws.len());
        let mut non_empty_idx = Vec::new();
        let mut non_empty_text = Vec::new();

        for raw in &raws {
            if raw.raw.trim().is_empty() {
                results.push(Some(CanonicalEvent::empty_input(raw.timestamp, raw.raw.clone())));
            } else {
                non_empty_idx.push(results.len());
                non_empty_text.push(raw.raw.clone());
                results.push(None);
            }
        }

        if !non_empty_text.is_empty() {
            match self.embedder.embed_batch(&non_empty_text) {
                Ok(embeddings) => {
                    for (slot, embedding) in non_empty_idx.into_iter().zip(embeddings) {
                        let raw = raws[slot].clone();
                        results[slot] = Some(self.finish(raw, &embedding));
                    }
                }
                Err(_) => {
                    for slot in non_empty_idx {
                        let raw = raws[slot].clone();
                        results[slot] = Some(self.fallback(raw));
                    }
                }
            }
        }

        results.into_iter().map(|r| r.expect("every slot filled")).collect()
    }

    fn finish(&self, raw: RawLog, embedding: &[f32]) -> CanonicalEvent {
        let classification = self.classifier.classify(embedding, self.taxonomy.labels());
        let compacted = self.compactor.compact(&raw.raw, &classification.root, self.verbosity);
        let summary = self.compactor.summary(&compacted);
        CanonicalEvent {
            root: classification.root,
            category: classification.leaf,
            severity: classification.severity.unwrap_or(crate::types::Severity::Warning),
            timestamp: raw.timestamp,
            summary,
            confidence: classification.confidence,
            raw: compacted,
            count: 0,
        }
    }

    /// A model failure (spec.md §4.8) degrades to `UNCLASSIFIED` rather
    /// than aborting the whole batch — one bad input never loses every
    /// sibling's event.
    fn fallback(&self, raw: RawLog) -> CanonicalEvent {
        let mut event = CanonicalEvent::empty_input(raw.timestamp, raw.raw.clone());
        event.category = "embedding_failed".to_string();
        event.summary = self.compactor.summary(&raw.raw);
        event
    }
}
