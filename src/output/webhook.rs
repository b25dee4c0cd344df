//! Webhook sink: batched JSON-array POST with size- or timer-triggered
//! flush and 5xx-only retry (spec.md §4.11).
//!
//! The batching/flush-timer shape mirrors [`crate::dedup::StreamBuffer`]
//! exactly — lock, snapshot-and-clear, release, then do the slow I/O —
//! since both are "accumulate until size or time, then act" buffers. The
//! timer task captures its own clones of everything it needs rather than
//! a reference back to the sink, so no self-referential `Arc` is needed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{filtered_for_verbosity, Sink};
use crate::config::Verbosity;
use crate::error::OutputError;
use crate::types::CanonicalEvent;

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 3;
const BACKOFF_SCHEDULE: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

pub type ErrorCallback = Arc<dyn Fn(OutputError) + Send + Sync>;

fn log_error_callback() -> ErrorCallback {
    Arc::new(|err| tracing::warn!(error = %err, "webhook sink: timer-triggered flush failed"))
}

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    verbosity: Verbosity,
    batch_size: usize,
    pending: Arc<Mutex<Vec<CanonicalEvent>>>,
    timer: Mutex<Option<oneshot::Sender<()>>>,
    on_error: ErrorCallback,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, verbosity: Verbosity) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            verbosity,
            batch_size: DEFAULT_BATCH_SIZE,
            pending: Arc::new(Mutex::new(Vec::new())),
            timer: Mutex::new(None),
            on_error: log_error_callback(),
        }
    }

    /// First event into an empty batch schedules this single-shot timer.
    /// Fires the flush itself, off the write path, routing any failure
    /// through `on_error` — the async wrapper can't intercept a flush
    /// that didn't happen on a `write` call (spec.md §4.11).
    fn arm_timer(&self) {
        let (tx, rx) = oneshot::channel();
        *self.timer.lock() = Some(tx);
        let client = self.client.clone();
        let url = self.url.clone();
        let verbosity = self.verbosity;
        let pending = self.pending.clone();
        let on_error = self.on_error.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(DEFAULT_FLUSH_INTERVAL) => {
                    if let Err(err) = flush(&client, &url, verbosity, &pending).await {
                        on_error(err);
                    }
                }
                _ = rx => {}
            }
        });
    }

    async fn flush(&self) -> Result<(), OutputError> {
        if let Some(tx) = self.timer.lock().take() {
            let _ = tx.send(());
        }
        flush(&self.client, &self.url, self.verbosity, &self.pending).await
    }
}

async fn flush(
    client: &reqwest::Client,
    url: &str,
    verbosity: Verbosity,
    pending: &Mutex<Vec<CanonicalEvent>>,
) -> Result<(), OutputError> {
    let batch = {
        let mut pending = pending.lock();
        std::mem::take(&mut *pending)
    };
    if batch.is_empty() {
        return Ok(());
    }
    post_batch(client, url, verbosity, &batch).await
}

async fn post_batch(
    client: &reqwest::Client,
    url: &str,
    verbosity: Verbosity,
    batch: &[CanonicalEvent],
) -> Result<(), OutputError> {
    let filtered: Vec<CanonicalEvent> = batch.iter().map(|e| filtered_for_verbosity(e, verbosity)).collect();

    let mut attempt = 0u32;
    loop {
        let response = client
            .post(url)
            .json(&filtered)
            .send()
            .await
            .map_err(|e| OutputError::Http(crate::error::HttpError::Request(e)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.is_server_error() && attempt < MAX_RETRIES {
            tokio::time::sleep(BACKOFF_SCHEDULE[attempt as usize]).await;
            attempt += 1;
            continue;
        }
        let body = response.text().await.unwrap_or_default();
        return Err(OutputError::Http(crate::error::HttpError::Api {
            status: status.as_u16(),
            body,
        }));
    }
}

#[async_trait]
impl Sink for WebhookSink {
    /// Appends `event` to the pending batch. The first event into an
    /// empty batch arms the flush timer; reaching `batch_size` flushes
    /// immediately on the write path instead of waiting for the timer.
    async fn write(&self, event: &CanonicalEvent) -> Result<(), OutputError> {
        let (was_empty, hit_cap) = {
            let mut pending = self.pending.lock();
            let was_empty = pending.is_empty();
            pending.push(event.clone());
            (was_empty, pending.len() >= self.batch_size)
        };

        if was_empty && !hit_cap {
            self.arm_timer();
        }
        if hit_cap {
            self.flush().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), OutputError> {
        self.flush().await
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
            raw: String::new(),
            count: 0,
        }
    }

    #[tokio::test]
    async fn batch_flushes_once_size_cap_is_reached() {
        // No real server; confirm the batch accumulates and clears once
        // `batch_size` is hit, without asserting on network success.
        let sink = WebhookSink::new("http://127.0.0.1:1", Verbosity::Standard);
        for _ in 0..DEFAULT_BATCH_SIZE - 1 {
            let _ = sink.write(&sample_event()).await;
            assert!(!sink.pending.lock().is_empty());
        }
        let _ = sink.write(&sample_event()).await;
        assert!(sink.pending.lock().is_empty(), "batch should clear once size cap triggers a flush attempt");
    }

    #[tokio::test]
    async fn close_flushes_a_partial_batch() {
        let sink = WebhookSink::new("http://127.0.0.1:1", Verbosity::Standard);
        let _ = sink.write(&sample_event()).await;
        assert!(!sink.pending.lock().is_empty());
        let _ = sink.close().await;
        assert!(sink.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_close_is_a_no_op() {
        let sink = WebhookSink::new("http://127.0.0.1:1", Verbosity::Standard);
        assert!(sink.close().await.is_ok());
    }
}
