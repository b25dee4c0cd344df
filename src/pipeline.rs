//! The pipeline: wires a connector, an [`Engine`], an output, and an
//! optional deduplicator into Stream and Query mode (spec.md §4.9).
//!
//! Grounded on the teacher's `orchestrator.rs` wiring shape — a single
//! struct owning every collaborator, with mode dispatch living in methods
//! on that struct rather than free functions closing over arguments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cancel::CancelToken;
use crate::connector::Connector;
use crate::dedup::StreamBuffer;
use crate::engine::Engine;
use crate::error::OutputError;
use crate::output::Sink;
use crate::types::RawLog;

/// `writtenEvents` and `skippedLogs`, tracked atomically so a concurrent
/// reader (e.g. a future status endpoint) never observes a torn update.
#[derive(Default)]
pub struct Counters {
    written: AtomicU64,
    skipped: AtomicU64,
}

impl Counters {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }
}

pub struct Pipeline {
    connector: Arc<dyn Connector>,
    engine: Arc<Engine>,
    output: Arc<dyn Sink>,
    dedup_window: Option<chrono::Duration>,
    dedup_max_buffer: usize,
    counters: Counters,
}

impl Pipeline {
    pub fn new(
        connector: Arc<dyn Connector>,
        engine: Arc<Engine>,
        output: Arc<dyn Sink>,
        dedup_window_secs: u64,
        dedup_max_buffer: usize,
    ) -> Self {
        Self {
            connector,
            engine,
            output,
            dedup_window: if dedup_window_secs == 0 {
                None
            } else {
                Some(chrono::Duration::seconds(dedup_window_secs as i64))
            },
            dedup_max_buffer,
            counters: Counters::default(),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Runs Stream mode until `cancel` fires. Dispatches to the dedup or
    /// direct loop depending on whether a dedup window is configured.
    pub async fn run_stream(&self, cancel: CancelToken) -> Result<(), OutputError> {
        match self.dedup_window {
            Some(window) => self.run_stream_with_dedup(cancel, window).await,
            None => self.run_stream_direct(cancel).await,
        }
    }

    async fn run_stream_direct(&self, cancel: CancelToken) -> Result<(), OutputError> {
        let mut stream = self.connector.stream(cancel.clone());
        use futures_util::StreamExt;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                batch = stream.next() => {
                    match batch {
                        Some(raws) => self.process_and_write(raws).await?,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn run_stream_with_dedup(&self, cancel: CancelToken, window: chrono::Duration) -> Result<(), OutputError> {
        let buffer = StreamBuffer::new(window, self.dedup_max_buffer);
        let mut stream = self.connector.stream(cancel.clone());
        use futures_util::StreamExt;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Final flush uses a fresh, never-cancelled token so
                    // sink writes can complete during drain (spec.md
                    // §4.9).
                    self.flush_buffer(&buffer).await?;
                    return Ok(());
                }
                _ = buffer.flush_due() => {
                    self.flush_buffer(&buffer).await?;
                }
                batch = stream.next() => {
                    match batch {
                        Some(raws) => {
                            for raw in raws {
                                let event = self.engine.process(raw);
                                if buffer.add(event) {
                                    self.flush_buffer(&buffer).await?;
                                }
                            }
                        }
                        None => {
                            self.flush_buffer(&buffer).await?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn flush_buffer(&self, buffer: &StreamBuffer) -> Result<(), OutputError> {
        for event in buffer.flush() {
            self.output.write(&event).await?;
            self.counters.written.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// A single raw-to-written step shared by the direct stream loop:
    /// process, then write, counting either outcome.
    async fn process_and_write(&self, raws: Vec<RawLog>) -> Result<(), OutputError> {
        for raw in raws {
            let event = self.engine.process(raw);
            self.output.write(&event).await?;
            self.counters.written.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// One-shot historical fetch over `[from, to)`. Falls back to a
    /// per-item skip-and-continue loop if the batch fetch itself
    /// succeeds but `ProcessBatch` would otherwise lose the whole
    /// window to one bad input (spec.md §4.9).
    pub async fn run_query(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<(), OutputError> {
        let raws = self
            .connector
            .query(from, to, limit, cancel)
            .await
            .map_err(|e| OutputError::Io(std::io::Error::other(e.to_string())))?;

        let events = self.engine.process_batch(raws);

        let events = match self.dedup_window {
            Some(window) => crate::dedup::dedup(events, window),
            None => events,
        };

        for event in events {
            self.output.write(&event).await?;
            self.counters.written.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<(), OutputError> {
        tracing::info!(
            written = self.counters.written(),
            skipped = self.counters.skipped(),
            "pipeline closing"
        );
        self.output.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::compactor::Compactor;
    use crate::config::Verbosity;
    use crate::connector::Connector;
    use crate::embedder::test_support::FakeEmbedder;
    use crate::error::ConnectorError;
    use crate::taxonomy::Taxonomy;
    use crate::types::{CanonicalEvent, TaxonomyNode};
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;
    use std::sync::Mutex as StdMutex;

    struct FixedConnector {
        batches: StdMutex<Vec<Vec<RawLog>>>,
    }

    #[async_trait]
    impl Connector for FixedConnector {
        async fn query(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            _limit: Option<usize>,
            _cancel: &CancelToken,
        ) -> Result<Vec<RawLog>, ConnectorError> {
            Ok(self.batches.lock().unwrap().drain(..).flatten().collect())
        }

        fn stream(&self, _cancel: CancelToken) -> BoxStream<'static, Vec<RawLog>> {
            let batches: Vec<Vec<RawLog>> = std::mem::take(&mut self.batches.lock().unwrap());
            Box::pin(futures_util::stream::iter(batches))
        }

        fn default_poll_interval(&self) -> std::time::Duration {
            std::time::Duration::from_secs(1)
        }
    }

    struct CollectingSink {
        events: StdMutex<Vec<CanonicalEvent>>,
    }

    #[async_trait]
    impl Sink for CollectingSink {
        async fn write(&self, event: &CanonicalEvent) -> Result<(), OutputError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
        async fn close(&self) -> Result<(), OutputError> {
            Ok(())
        }
    }

    fn make_engine() -> Engine {
        let embedder = FakeEmbedder::new(4);
        let roots: &[TaxonomyNode] = &[];
        let taxonomy = Taxonomy::build_from(&embedder, roots).unwrap();
        Engine::new(Box::new(embedder), taxonomy, Classifier::new(0.5), Compactor::default(), Verbosity::Standard)
    }

    #[tokio::test]
    async fn direct_stream_mode_writes_every_event_and_counts_it() {
        let connector = Arc::new(FixedConnector {
            batches: StdMutex::new(vec![vec![
                RawLog::new(Utc::now(), "test", "connection refused"),
                RawLog::new(Utc::now(), "test", "another log line"),
            ]]),
        });
        let sink = Arc::new(CollectingSink { events: StdMutex::new(Vec::new()) });
        let pipeline = Pipeline::new(connector, Arc::new(make_engine()), sink.clone(), 0, 0);

        let cancel = CancelToken::new();
        let cancel_for_run = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel_for_run.cancel();
        });
        let _ = pipeline.run_stream(cancel).await;

        assert_eq!(sink.events.lock().unwrap().len(), 2);
        assert_eq!(pipeline.counters().written(), 2);
    }

    #[tokio::test]
    async fn query_mode_writes_processed_batch_and_reports_counters() {
        let connector = Arc::new(FixedConnector {
            batches: StdMutex::new(vec![vec![
                RawLog::new(Utc::now(), "test", "a real log line"),
                RawLog::new(Utc::now(), "test", "   "),
            ]]),
        });
        let sink = Arc::new(CollectingSink { events: StdMutex::new(Vec::new()) });
        let pipeline = Pipeline::new(connector, Arc::new(make_engine()), sink.clone(), 0, 0);

        let cancel = CancelToken::new();
        let from = Utc::now() - chrono::Duration::hours(1);
        let to = Utc::now();
        pipeline.run_query(from, to, None, &cancel).await.unwrap();

        assert_eq!(sink.events.lock().unwrap().len(), 2);
        assert_eq!(pipeline.counters().written(), 2);
    }
}
