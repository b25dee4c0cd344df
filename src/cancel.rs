//! A minimal cancellation context, built directly on `tokio::sync::watch`
//! rather than pulling in a dedicated crate for what amounts to a single
//! broadcast boolean: every task that needs to react to shutdown already
//! depends on `tokio`, and `watch` gives exactly the semantics spec.md's
//! "context cancellation" needs — a receiver can observe the cancelled
//! state immediately or wait for it.

use tokio::sync::watch;

/// Cheap to clone; all clones observe the same cancellation.
#[derive(Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// A fresh, never-cancelled token. Used for the final dedup flush
    /// during drain (spec.md §4.9) so sink writes can complete even though
    /// the root context has already been cancelled.
    pub fn fresh() -> Self {
        Self::new()
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel()` has been called. Safe to await from
    /// multiple clones concurrently.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        assert!(!token.is_cancelled());
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
    }
}
