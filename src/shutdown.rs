//! Graceful shutdown: a signal watcher that cancels the root
//! [`CancelToken`] on the first SIGINT/SIGTERM and force-exits on the
//! second signal or on a drain timeout (spec.md §4.12).

use std::time::Duration;

use crate::cancel::CancelToken;

const DEFAULT_CAPACITY: usize = 2;

/// Spawns the signal-watcher task. First signal cancels `root`; a second
/// signal, or `timeout` elapsing after the first, calls
/// `std::process::exit(1)` directly — shutdown's entire job is to bound
/// how long a stuck drain can run.
pub fn watch(root: CancelToken, timeout: Duration) {
    tokio::spawn(async move {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(DEFAULT_CAPACITY);
        spawn_signal_forwarder(tx);

        if rx.recv().await.is_none() {
            return;
        }
        tracing::warn!("shutdown signal received, cancelling pipeline");
        root.cancel();

        tokio::select! {
            _ = rx.recv() => {
                tracing::warn!("second shutdown signal received, forcing exit");
                std::process::exit(1);
            }
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "shutdown drain timed out, forcing exit");
                std::process::exit(1);
            }
        }
    });
}

#[cfg(unix)]
fn spawn_signal_forwarder(tx: tokio::sync::mpsc::Sender<()>) {
    use tokio::signal::unix::{signal, SignalKind};
    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            if tx.send(()).await.is_err() {
                return;
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_signal_forwarder(tx: tokio::sync::mpsc::Sender<()>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if tx.send(()).await.is_err() {
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_forces_cancellation_even_without_a_signal() {
        // Exercises the cancellation side only — the process::exit branch
        // is intentionally not exercised under test.
        let root = CancelToken::new();
        let root_clone = root.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            root_clone.cancel();
        });
        root.cancelled().await;
        assert!(root.is_cancelled());
    }
}
