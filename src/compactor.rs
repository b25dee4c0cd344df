//! Token-efficient text compaction: field stripping, stack-trace folding,
//! rune-safe truncation, and summary extraction (spec.md §4.7).
//!
//! Grounded on the teacher's `regex` dependency (declared, never exercised
//! by the teacher) and on the rune-safe iteration idiom the teacher uses
//! for Unicode NFC normalization in `nlu/mod.rs::process_message`.

use frame_patterns::frame_regexes;
use serde_json::Value;

use crate::config::Verbosity;

const ERROR_ROOT: &str = "ERROR";

const DEFAULT_STRIP_KEYS: &[&str] = &[
    "trace_id",
    "span_id",
    "request_id",
    "x_request_id",
    "correlation_id",
    "trace.id",
    "span.id",
];

mod frame_patterns {
    use regex::Regex;
    use std::sync::OnceLock;

    pub struct FrameRegexes {
        pub at_line: Regex,
        pub go_file_line: Regex,
        pub goroutine: Regex,
    }

    pub fn frame_regexes() -> &'static FrameRegexes {
        static CELL: OnceLock<FrameRegexes> = OnceLock::new();
        CELL.get_or_init(|| FrameRegexes {
            at_line: Regex::new(r"^\s+at \S").unwrap(),
            go_file_line: Regex::new(r"\s+\S+\.go:\d+").unwrap(),
            goroutine: Regex::new(r"^goroutine \d+").unwrap(),
        })
    }
}

fn is_frame_line(line: &str, regexes: &frame_patterns::FrameRegexes) -> bool {
    regexes.at_line.is_match(line) || regexes.go_file_line.is_match(line) || regexes.goroutine.is_match(line)
}

pub struct Compactor {
    strip_keys: Vec<String>,
}

impl Default for Compactor {
    fn default() -> Self {
        Self {
            strip_keys: DEFAULT_STRIP_KEYS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Compactor {
    pub fn new(strip_keys: Vec<String>) -> Self {
        Self { strip_keys }
    }

    /// Applies field stripping, stack-trace folding, and truncation, in
    /// that order, then returns the compacted text.
    pub fn compact(&self, text: &str, root: &str, verbosity: Verbosity) -> String {
        let mut text = text.to_string();

        if !matches!(verbosity, Verbosity::Full) {
            text = self.strip_fields(&text);
        }

        if root == ERROR_ROOT && !matches!(verbosity, Verbosity::Full) {
            let max_frames = match verbosity {
                Verbosity::Minimal => 5,
                Verbosity::Standard => 10,
                Verbosity::Full => unreachable!(),
            };
            text = fold_stack_trace(&text, max_frames);
        }

        let limit = match verbosity {
            Verbosity::Minimal => Some(200),
            Verbosity::Standard => Some(2000),
            Verbosity::Full => None,
        };
        if let Some(limit) = limit {
            text = truncate_runes(&text, limit);
        }

        text
    }

    /// If `raw.trim()` begins with `{`, parses it as a JSON object and
    /// removes the configured high-cardinality keys. Non-object or
    /// unparseable input passes through unchanged.
    fn strip_fields(&self, text: &str) -> String {
        let trimmed = text.trim_start();
        if !trimmed.starts_with('{') {
            return text.to_string();
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(mut map)) => {
                for key in &self.strip_keys {
                    map.remove(key);
                }
                serde_json::to_string(&Value::Object(map)).unwrap_or_else(|_| text.to_string())
            }
            _ => text.to_string(),
        }
    }

    /// The first line of `text`, truncated at the last word boundary
    /// before rune 120 (with a `...` suffix) if it would otherwise exceed
    /// 120 runes.
    pub fn summary(&self, text: &str) -> String {
        let first_line = text.lines().next().unwrap_or("");
        let runes: Vec<char> = first_line.chars().collect();
        if runes.len() <= 120 {
            return first_line.to_string();
        }
        let cut_at = runes[..120]
            .iter()
            .rposition(|&c| c == ' ')
            .unwrap_or(120);
        let mut out: String = runes[..cut_at].iter().collect();
        out.push_str("...");
        out
    }
}

/// Detects frame lines by the three patterns in spec.md §4.7. If the total
/// frame count exceeds `max_frames + 2`, keeps every non-frame line, the
/// first `max_frames` frames, an omission marker, and the last 2 frames.
fn fold_stack_trace(text: &str, max_frames: usize) -> String {
    let regexes = frame_regexes();
    let lines: Vec<&str> = text.lines().collect();
    let frame_indices: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| is_frame_line(l, regexes))
        .map(|(i, _)| i)
        .collect();

    if frame_indices.len() <= max_frames + 2 {
        return text.to_string();
    }

    let keep_first: std::collections::HashSet<usize> = frame_indices[..max_frames].iter().copied().collect();
    let keep_last: std::collections::HashSet<usize> =
        frame_indices[frame_indices.len() - 2..].iter().copied().collect();
    let omitted = frame_indices.len() - max_frames - 2;

    let mut out = Vec::with_capacity(lines.len());
    let mut marker_inserted = false;
    for (i, line) in lines.iter().enumerate() {
        let is_frame = keep_first.contains(&i) || keep_last.contains(&i);
        let is_dropped_frame = frame_indices.contains(&i) && !is_frame;
        if is_dropped_frame {
            if !marker_inserted {
                out.push(format!("\t... ({omitted} frames omitted) ..."));
                marker_inserted = true;
            }
            continue;
        }
        out.push(line.to_string());
    }
    out.join("\n")
}

/// Cuts at a `char` boundary, never inside a multi-byte sequence — the
/// byte-index-slicing bug class spec.md §4.7 calls out by name.
fn truncate_runes(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fields_removes_high_cardinality_keys() {
        let compactor = Compactor::default();
        let input = r#"{"trace_id":"abc","message":"boom","request_id":"r1"}"#;
        let out = compactor.strip_fields(input);
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert!(parsed.get("trace_id").is_none());
        assert!(parsed.get("request_id").is_none());
        assert_eq!(parsed["message"], "boom");
    }

    #[test]
    fn strip_fields_passes_through_non_json() {
        let compactor = Compactor::default();
        let input = "plain text log line";
        assert_eq!(compactor.strip_fields(input), input);
    }

    #[test]
    fn strip_fields_skipped_at_full_verbosity() {
        let compactor = Compactor::default();
        let input = r#"{"trace_id":"abc"}"#;
        let out = compactor.compact(input, "REQUEST", Verbosity::Full);
        assert!(out.contains("trace_id"));
    }

    #[test]
    fn truncate_runes_never_splits_multibyte_characters() {
        let text = "a".repeat(199) + "日本語のテキストです";
        let out = truncate_runes(&text, 200);
        assert!(String::from_utf8(out.clone().into_bytes()).is_ok());
        assert!(out.ends_with("..."));
    }

    #[test]
    fn summary_keeps_short_first_line_as_is() {
        let compactor = Compactor::default();
        assert_eq!(compactor.summary("short line\nsecond line"), "short line");
    }

    #[test]
    fn summary_cuts_long_first_line_at_word_boundary() {
        let compactor = Compactor::default();
        let long_line = (0..30).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let summary = compactor.summary(&long_line);
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= 124);
        assert!(!summary[..summary.len() - 3].ends_with(' '));
    }

    #[test]
    fn stack_trace_folds_30_frames_to_first_5_plus_last_2() {
        let mut lines = vec!["panic: boom".to_string()];
        for i in 0..30 {
            lines.push(format!("\tat handler{i} /app/server.go:{i}"));
        }
        let text = lines.join("\n");
        let folded = fold_stack_trace(&text, 5);
        let folded_lines: Vec<&str> = folded.lines().collect();
        assert!(folded_lines[0] == "panic: boom");
        assert!(folded_lines.iter().any(|l| l.contains("frames omitted")));
        assert!(folded_lines.iter().any(|l| l.contains("handler0")));
        assert!(folded_lines.iter().any(|l| l.contains("handler29")));
        assert!(!folded_lines.iter().any(|l| l.contains("handler10")));
    }

    #[test]
    fn stack_trace_under_threshold_is_untouched() {
        let text = "panic: boom\n\tat f1 /app/x.go:1\n\tat f2 /app/x.go:2".to_string();
        assert_eq!(fold_stack_trace(&text, 5), text);
    }

    #[test]
    fn goroutine_header_is_detected_as_a_frame_line() {
        let regexes = frame_regexes();
        assert!(is_frame_line("goroutine 17 [running]:", regexes));
    }
}
