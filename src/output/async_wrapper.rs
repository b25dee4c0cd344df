//! The async backpressure wrapper (spec.md §4.11): decouples a producer
//! from a slow inner sink via a bounded channel and a background drain
//! worker.
//!
//! The teacher itself has no `mpsc` usage — its SSE plumbing
//! (`web/state.rs`'s `broadcast::Sender<IngestionEvent>`, consumed in
//! `web/handlers.rs` via `BroadcastStream`) is a fan-out broadcast, not a
//! work queue. This wrapper instead adapts that channel-decoupled-from-
//! consumer shape to `tokio::sync::mpsc`, the channel actually suited to a
//! single bounded work queue with an explicit backpressure/drop-on-full
//! choice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use super::Sink;
use crate::error::OutputError;
use crate::types::CanonicalEvent;

const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// What happens to a `write` when the channel is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FullPolicy {
    /// Block until space is available (the default).
    Backpressure,
    /// Return immediately, dropping the event and invoking the drop
    /// callback.
    DropOnFull,
}

pub type ErrorCallback = Arc<dyn Fn(OutputError) + Send + Sync>;
pub type DropCallback = Arc<dyn Fn(&CanonicalEvent) + Send + Sync>;

fn log_error_callback() -> ErrorCallback {
    Arc::new(|err| tracing::warn!(error = %err, "async sink: inner write failed"))
}

fn noop_drop_callback() -> DropCallback {
    Arc::new(|_event| {})
}

/// Wraps `inner` so producers enqueue onto a bounded channel instead of
/// blocking on the sink's actual I/O. A single background task drains the
/// channel and forwards to `inner`, routing write failures to
/// `on_error` rather than back to the producer (spec.md §4.11: "the
/// pipeline never sees transient sink errors").
pub struct AsyncSink {
    tx: mpsc::Sender<CanonicalEvent>,
    policy: FullPolicy,
    on_drop: DropCallback,
    closed: Arc<Notify>,
    worker: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    close_once: std::sync::atomic::AtomicBool,
}

impl AsyncSink {
    pub fn new(inner: Box<dyn Sink>) -> Self {
        Self::with_options(inner, DEFAULT_CAPACITY, FullPolicy::Backpressure, log_error_callback(), noop_drop_callback())
    }

    pub fn with_options(
        inner: Box<dyn Sink>,
        capacity: usize,
        policy: FullPolicy,
        on_error: ErrorCallback,
        on_drop: DropCallback,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<CanonicalEvent>(capacity);
        let closed = Arc::new(Notify::new());
        let worker_closed = closed.clone();

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = inner.write(&event).await {
                    on_error(err);
                }
            }
            if let Err(err) = inner.close().await {
                on_error(err);
            }
            worker_closed.notify_one();
        });

        Self {
            tx,
            policy,
            on_drop,
            closed,
            worker: tokio::sync::Mutex::new(Some(worker)),
            close_once: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Enqueues `event`. Under [`FullPolicy::Backpressure`] this awaits
    /// until space is available; under [`FullPolicy::DropOnFull`] it
    /// returns immediately and invokes the drop callback when the channel
    /// was full.
    pub async fn enqueue(&self, event: CanonicalEvent) {
        match self.policy {
            FullPolicy::Backpressure => {
                let _ = self.tx.send(event).await;
            }
            FullPolicy::DropOnFull => {
                if let Err(mpsc::error::TrySendError::Full(dropped)) = self.tx.try_send(event) {
                    (self.on_drop)(&dropped);
                }
            }
        }
    }

    /// Idempotent: a second call is a no-op. Closes the input channel,
    /// waits (bounded by [`DEFAULT_DRAIN_TIMEOUT`]) for the worker to
    /// drain remaining events, then returns.
    pub async fn close(&self) {
        if self.close_once.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let handle = self.worker.lock().await.take();
        drop(self.tx.clone());
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(DEFAULT_DRAIN_TIMEOUT, handle).await;
        }
    }
}

/// Lets `AsyncSink` slot into a [`MultiSink`](super::MultiSink) fan-out
/// alongside direct sinks. `write` always succeeds from the caller's
/// point of view — that's the whole point of the wrapper — and `close`
/// defers to the inherent, Result-less `close` above (method resolution
/// prefers the inherent method, so this doesn't recurse).
#[async_trait]
impl Sink for AsyncSink {
    async fn write(&self, event: &CanonicalEvent) -> Result<(), OutputError> {
        self.enqueue(event.clone()).await;
        Ok(())
    }

    async fn close(&self) -> Result<(), OutputError> {
        self.close().await;
        Ok(())
    }
}
