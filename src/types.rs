//! Core data model shared by every component: the universal input
//! ([`RawLog`]) produced by connectors and the universal output
//! ([`CanonicalEvent`]) produced by the engine.
//!
//! Neither type is ever mutated after construction; a `RawLog` flows from a
//! connector into the engine and a `CanonicalEvent` flows from the engine
//! into the output layer. Nothing downstream hands one back upstream.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized severity, one of the four values the wire format ever emits.
///
/// Modeled as a closed enum rather than a bare `String` — the set is fixed
/// by the taxonomy and a typo here should be a compile error, not a runtime
/// surprise a downstream consumer discovers later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Debug,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            "debug" => Ok(Severity::Debug),
            other => Err(format!("not a valid severity: {other}")),
        }
    }
}

/// The universal input produced by connectors.
///
/// Created exclusively by a connector's result-to-`RawLog` mapping and
/// consumed exclusively by the engine. Never mutated after creation.
#[derive(Clone, Debug, PartialEq)]
pub struct RawLog {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub raw: String,
    pub metadata: HashMap<String, String>,
}

impl RawLog {
    pub fn new(timestamp: DateTime<Utc>, source: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            timestamp,
            source: source.into(),
            raw: raw.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The universal output produced by the engine.
///
/// Reserved sentinel: `root == "UNCLASSIFIED"` with `leaf == "empty_input"`
/// (whitespace-only source text) or `leaf == ""` (a below-threshold
/// classification) and `confidence == 0.0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    #[serde(rename = "type")]
    pub root: String,
    pub category: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    #[serde(skip_serializing_if = "is_zero_confidence")]
    pub confidence: f32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub raw: String,
    #[serde(skip_serializing_if = "is_zero_count")]
    pub count: u32,
}

fn is_zero_confidence(c: &f32) -> bool {
    *c == 0.0
}

fn is_zero_count(c: &u32) -> bool {
    *c == 0
}

pub const UNCLASSIFIED_ROOT: &str = "UNCLASSIFIED";
pub const EMPTY_INPUT_LEAF: &str = "empty_input";

impl CanonicalEvent {
    /// An `UNCLASSIFIED`/`empty_input` event for whitespace-only source
    /// text. The embedder is never invoked to build this event — see
    /// `Engine::process`.
    pub fn empty_input(timestamp: DateTime<Utc>, raw: String) -> Self {
        Self {
            root: UNCLASSIFIED_ROOT.to_string(),
            category: EMPTY_INPUT_LEAF.to_string(),
            severity: Severity::Warning,
            timestamp,
            summary: String::new(),
            confidence: 0.0,
            raw,
            count: 0,
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.root == UNCLASSIFIED_ROOT
    }
}

/// A node in the two-level taxonomy tree: 8 roots, each with ~5 leaves.
///
/// Roots have an empty `description`; leaves carry the description used as
/// embedding text and the severity assigned on a match.
#[derive(Clone, Debug)]
pub struct TaxonomyNode {
    pub name: &'static str,
    pub description: &'static str,
    pub severity: Option<Severity>,
    pub children: &'static [TaxonomyNode],
}

/// A leaf's compiled form: dotted path, severity, and the embedding of
/// `"{root}: {leaf.description}"`. Built once by the taxonomy constructor;
/// read-only thereafter.
#[derive(Clone, Debug)]
pub struct EmbeddedLabel {
    pub path: String,
    pub severity: Severity,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_round_trips_through_wire_strings() {
        for s in [Severity::Error, Severity::Warning, Severity::Info, Severity::Debug] {
            let rendered = s.to_string();
            let parsed: Severity = rendered.parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn canonical_event_omits_zero_valued_fields() {
        let ev = CanonicalEvent {
            root: "REQUEST".into(),
            category: "success".into(),
            severity: Severity::Info,
            timestamp: Utc::now(),
            summary: "GET /api/users 200 OK".into(),
            confidence: 0.0,
            raw: String::new(),
            count: 0,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("confidence").is_none());
        assert!(json.get("raw").is_none());
        assert!(json.get("count").is_none());
        assert_eq!(json.get("type").unwrap(), "REQUEST");
    }

    #[test]
    fn canonical_event_keeps_nonzero_count_and_confidence() {
        let ev = CanonicalEvent {
            root: "ERROR".into(),
            category: "connection_failure".into(),
            severity: Severity::Error,
            timestamp: Utc::now(),
            summary: "connection refused (x10 in 900ms)".into(),
            confidence: 0.82,
            raw: "connection refused".into(),
            count: 10,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["count"], 10);
        assert!((json["confidence"].as_f64().unwrap() - 0.82).abs() < 1e-6);
    }
}
