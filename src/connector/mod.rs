//! Source connectors: the `Connector` trait every provider implements, and
//! the process-wide registry main.rs resolves `--connector` against
//! (spec.md §4.2).
//!
//! Grounded on the teacher's `metrics.rs`'s `static SYS: OnceLock<Mutex<System>>`
//! process-wide singleton idiom, generalized from one fixed value to a
//! name-keyed table of boxed trait objects so new providers can register
//! themselves without main.rs growing a match arm per provider.

pub mod provider_a;
pub mod provider_b;
pub mod provider_c;

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use parking_lot::RwLock;

use crate::cancel::CancelToken;
use crate::error::ConnectorError;
use crate::types::RawLog;

/// A historical, bounded fetch over `[from, to)`, honoring `limit` when
/// `Some` (spec.md §4.2/§4.3: every provider's pagination is internal to
/// this call; the caller never sees a cursor).
#[async_trait]
pub trait Connector: Send + Sync {
    /// One-shot fetch for Query mode. Fails with a single error describing
    /// the aggregate failure.
    async fn query(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<Vec<RawLog>, ConnectorError>;

    /// A continuous poll loop for Stream mode: one item per poll cycle
    /// (possibly empty). Per-poll errors are logged as a warning inside
    /// the implementation and never surface here — the cursor is
    /// preserved and the stream keeps running. The stream ends only when
    /// `cancel` fires.
    fn stream(&self, cancel: CancelToken) -> BoxStream<'static, Vec<RawLog>>;

    /// The provider's own default poll interval, overridable by
    /// `--poll-interval-secs`.
    fn default_poll_interval(&self) -> std::time::Duration;
}

/// The streaming pattern shared across every provider (spec.md §4.2): an
/// immediate poll on entry, then a ticker loop; every send and every wait
/// is guarded by cancellation so the worker can never leak past the
/// consumer giving up.
pub(crate) fn poll_loop<F, Fut>(
    interval: std::time::Duration,
    cancel: CancelToken,
    connector_name: &'static str,
    poll: F,
) -> BoxStream<'static, Vec<RawLog>>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Vec<RawLog>, ConnectorError>> + Send + 'static,
{
    use futures_util::stream::StreamExt;

    let (tx, rx) = tokio::sync::mpsc::channel(64);
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let batch = match poll().await {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!(connector = connector_name, error = %err, "poll failed, cursor preserved");
                    Vec::new()
                }
            };

            tokio::select! {
                result = tx.send(batch) => {
                    if result.is_err() {
                        return;
                    }
                }
                _ = cancel.cancelled() => return,
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return,
            }
        }
    });

    tokio_stream::wrappers::ReceiverStream::new(rx).boxed()
}

type Registry = RwLock<HashMap<String, fn(&HashMap<String, String>, Option<String>) -> Result<Box<dyn Connector>, ConnectorError>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<String, _> = HashMap::new();
        map.insert("provider_a".to_string(), provider_a::build as _);
        map.insert("provider_b".to_string(), provider_b::build as _);
        map.insert("provider_c".to_string(), provider_c::build as _);
        RwLock::new(map)
    })
}

/// Builds the named connector, threading `extra` (the parsed
/// `--extra key=value` pairs) and `api_key` through to its constructor.
pub fn build(
    name: &str,
    extra: &HashMap<String, String>,
    api_key: Option<String>,
) -> Result<Box<dyn Connector>, ConnectorError> {
    let table = registry().read();
    match table.get(name) {
        Some(ctor) => ctor(extra, api_key),
        None => Err(ConnectorError::UnknownProvider(name.to_string())),
    }
}

pub fn registered_names() -> Vec<String> {
    registry().read().keys().cloned().collect()
}

/// Reads a required key out of `extra`, producing a typed error naming
/// both the key and the connector so a misconfiguration is diagnosable
/// from the error message alone.
pub(crate) fn require_extra(
    extra: &HashMap<String, String>,
    key: &str,
    connector_name: &str,
) -> Result<String, ConnectorError> {
    extra
        .get(key)
        .cloned()
        .ok_or_else(|| ConnectorError::MissingConfigKey(key.to_string(), connector_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_built_in_connector_is_registered() {
        let names = registered_names();
        for expected in ["provider_a", "provider_b", "provider_c"] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn unknown_connector_name_is_a_typed_error() {
        let err = build("does_not_exist", &HashMap::new(), None).unwrap_err();
        assert!(matches!(err, ConnectorError::UnknownProvider(_)));
    }

    #[test]
    fn missing_required_extra_key_names_both_key_and_connector() {
        let err = require_extra(&HashMap::new(), "project_id", "provider_a").unwrap_err();
        match err {
            ConnectorError::MissingConfigKey(key, conn) => {
                assert_eq!(key, "project_id");
                assert_eq!(conn, "provider_a");
            }
            other => panic!("expected MissingConfigKey, got {other:?}"),
        }
    }
}
