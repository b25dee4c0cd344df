//! The output layer: a `Sink` trait every output implements, plus the
//! multi-router, the async backpressure wrapper, and three concrete sinks
//! (spec.md §4.11).
//!
//! Grounded on the teacher's `persistence.rs` — a single trait-shaped
//! capability wrapped in error-annotating call sites — generalized from
//! one JSON-file writer to several heterogeneous, independently
//! failure-isolated outputs.

pub mod async_wrapper;
pub mod file;
pub mod stdout;
pub mod webhook;

use async_trait::async_trait;

use crate::error::OutputError;
use crate::types::CanonicalEvent;

pub use async_wrapper::{AsyncSink, FullPolicy};
pub use file::FileSink;
pub use stdout::StdoutSink;
pub use webhook::WebhookSink;

#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, event: &CanonicalEvent) -> Result<(), OutputError>;
    async fn close(&self) -> Result<(), OutputError>;
}

/// Applies the verbosity-aware field-omission filter (spec.md §4.11: omit
/// `raw` and `confidence` at Minimal) before a sink serializes an event.
pub fn filtered_for_verbosity(event: &CanonicalEvent, verbosity: crate::config::Verbosity) -> CanonicalEvent {
    let mut event = event.clone();
    if matches!(verbosity, crate::config::Verbosity::Minimal) {
        event.raw.clear();
        event.confidence = 0.0;
    }
    event
}

/// Holds N sinks; `write` calls each sequentially so a delivery to sink 3
/// still happens even if sink 2 failed, collecting every failure into one
/// joined error rather than short-circuiting on the first (spec.md
/// §4.11). Sequential by design: stdout and a buffered file sink both
/// complete in microseconds, so the overhead of running them concurrently
/// would dominate; slow sinks belong behind [`AsyncSink`] instead.
pub struct MultiSink {
    sinks: Vec<Box<dyn Sink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl Sink for MultiSink {
    async fn write(&self, event: &CanonicalEvent) -> Result<(), OutputError> {
        let mut errors = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.write(event).await {
                errors.push(e.to_string());
            }
        }
        join_errors(errors)
    }

    async fn close(&self) -> Result<(), OutputError> {
        let mut errors = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.close().await {
                errors.push(e.to_string());
            }
        }
        join_errors(errors)
    }
}

fn join_errors(errors: Vec<String>) -> Result<(), OutputError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(OutputError::Io(std::io::Error::other(errors.join("; "))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        writes: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Sink for CountingSink {
        async fn write(&self, _event: &CanonicalEvent) -> Result<(), OutputError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(OutputError::Closed)
            } else {
                Ok(())
            }
        }
        async fn close(&self) -> Result<(), OutputError> {
            Ok(())
        }
    }

    fn sample_event() -> CanonicalEvent {
        CanonicalEvent {
            root: "REQUEST".into(),
            category: "success".into(),
            severity: crate::types::Severity::Info,
            timestamp: chrono::Utc::now(),
            summary: "GET /x 200".into(),
            confidence: 0.9,
            raw: "raw text".into(),
            count: 0,
        }
    }

    #[tokio::test]
    async fn a_failing_sink_does_not_prevent_delivery_to_the_next() {
        let writes = Arc::new(AtomicUsize::new(0));
        let multi = MultiSink::new(vec![
            Box::new(CountingSink { writes: writes.clone(), fail: true }),
            Box::new(CountingSink { writes: writes.clone(), fail: false }),
        ]);
        let result = multi.write(&sample_event()).await;
        assert!(result.is_err());
        assert_eq!(writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_sinks_succeeding_is_ok() {
        let writes = Arc::new(AtomicUsize::new(0));
        let multi = MultiSink::new(vec![
            Box::new(CountingSink { writes: writes.clone(), fail: false }),
            Box::new(CountingSink { writes: writes.clone(), fail: false }),
        ]);
        assert!(multi.write(&sample_event()).await.is_ok());
    }

    #[test]
    fn minimal_verbosity_omits_raw_and_confidence() {
        let event = sample_event();
        let filtered = filtered_for_verbosity(&event, crate::config::Verbosity::Minimal);
        assert!(filtered.raw.is_empty());
        assert_eq!(filtered.confidence, 0.0);
        assert_eq!(filtered.summary, event.summary);
    }

    #[test]
    fn standard_verbosity_keeps_every_field() {
        let event = sample_event();
        let filtered = filtered_for_verbosity(&event, crate::config::Verbosity::Standard);
        assert_eq!(filtered.raw, event.raw);
        assert_eq!(filtered.confidence, event.confidence);
    }
}
