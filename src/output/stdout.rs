//! Stdout sink: synchronous, single-line or pretty JSON (spec.md §4.11).
//! A broken pipe is genuinely fatal here — there is no slower sink behind
//! it to fall back on — so it propagates rather than routing through an
//! error callback.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write as _;

use super::{filtered_for_verbosity, Sink};
use crate::config::Verbosity;
use crate::error::OutputError;
use crate::types::CanonicalEvent;

pub struct StdoutSink {
    pretty: bool,
    verbosity: Verbosity,
    lock: Mutex<()>,
}

impl StdoutSink {
    pub fn new(pretty: bool, verbosity: Verbosity) -> Self {
        Self {
            pretty,
            verbosity,
            lock: Mutex::new(()),
        }
    }

    fn render(&self, event: &CanonicalEvent) -> Result<String, OutputError> {
        let filtered = filtered_for_verbosity(event, self.verbosity);
        if self.pretty {
            Ok(serde_json::to_string_pretty(&filtered)?)
        } else {
            Ok(serde_json::to_string(&filtered)?)
        }
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn write(&self, event: &CanonicalEvent) -> Result<(), OutputError> {
        let rendered = self.render(event)?;
        let _guard = self.lock.lock();
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{rendered}")?;
        Ok(())
    }

    async fn close(&self) -> Result<(), OutputError> {
        std::io::stdout().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn sample_event() -> CanonicalEvent {
        CanonicalEvent {
            root: "REQUEST".into(),
            category: "success".into(),
            severity: Severity::Info,
            timestamp: chrono::Utc::now(),
            summary: "ok".into(),
            confidence: 0.9,
            raw: "payload".into(),
            count: 0,
        }
    }

    #[test]
    fn single_line_render_is_compact_json() {
        let sink = StdoutSink::new(false, Verbosity::Standard);
        let rendered = sink.render(&sample_event()).unwrap();
        assert!(!rendered.contains('\n'));
        serde_json::from_str::<serde_json::Value>(&rendered).unwrap();
    }

    #[test]
    fn pretty_render_is_multi_line_json() {
        let sink = StdoutSink::new(true, Verbosity::Standard);
        let rendered = sink.render(&sample_event()).unwrap();
        assert!(rendered.contains('\n'));
        serde_json::from_str::<serde_json::Value>(&rendered).unwrap();
    }

    #[tokio::test]
    async fn write_and_close_succeed_against_real_stdout() {
        let sink = StdoutSink::new(false, Verbosity::Standard);
        sink.write(&sample_event()).await.unwrap();
        sink.close().await.unwrap();
    }
}
