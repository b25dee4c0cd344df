//! Provider B: token-paginated, client-side time filter (spec.md §4.2.b).
//!
//! The half-open `[Start, End)` filter is applied here, after
//! deserialization, rather than trusted to the provider — this is what
//! makes consecutive query windows never double-count an entry (spec.md
//! §8, P5).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::error::ConnectorError;
use crate::http_client::HttpClient;
use crate::types::RawLog;

use super::{require_extra, Connector};

const NAME: &str = "provider_b";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct Envelope {
    items: Vec<Item>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
struct Item {
    time: String,
    text: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

pub struct ProviderB {
    client: HttpClient,
    app_name: String,
}

pub fn build(extra: &HashMap<String, String>, api_key: Option<String>) -> Result<Box<dyn Connector>, ConnectorError> {
    let app_name = require_extra(extra, "app_name", NAME)?;
    let token = api_key.ok_or_else(|| ConnectorError::MissingConfigKey("api_key".to_string(), NAME.to_string()))?;
    let client = HttpClient::new("https://provider-b.example.com/v2".to_string(), token);
    Ok(Box::new(ProviderB { client, app_name }))
}

impl ProviderB {
    async fn fetch_page(&self, next_token: Option<String>, cancel: &CancelToken) -> Result<Envelope, ConnectorError> {
        let mut params = vec![("app_name", self.app_name.clone())];
        if let Some(t) = next_token {
            params.push(("page_token", t));
        }
        self.client.get_json("/entries", &params, cancel).await.map_err(ConnectorError::Http)
    }

    fn to_raw_log(item: Item) -> Option<RawLog> {
        let timestamp = DateTime::parse_from_rfc3339(&item.time).ok()?.with_timezone(&Utc);
        Some(RawLog::new(timestamp, NAME, item.text).with_metadata(item.labels))
    }
}

/// The half-open-interval filter applied after deserialization (spec.md
/// §4.2.b): `start` inclusive, `end` exclusive.
fn in_window(ts: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    ts >= start && ts < end
}

#[async_trait]
impl Connector for ProviderB {
    async fn query(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<Vec<RawLog>, ConnectorError> {
        let mut out = Vec::new();
        let mut next_token = None;

        loop {
            if cancel.is_cancelled() {
                return Err(ConnectorError::Http(crate::error::HttpError::Cancelled));
            }
            let envelope = self.fetch_page(next_token.clone(), cancel).await?;
            let had_items = !envelope.items.is_empty();

            for item in envelope.items {
                let Some(log) = Self::to_raw_log(item) else { continue };
                if in_window(log.timestamp, from, to) {
                    out.push(log);
                    if let Some(l) = limit {
                        if out.len() >= l {
                            out.truncate(l);
                            return Ok(out);
                        }
                    }
                }
            }

            match envelope.next_token {
                Some(next) if had_items => next_token = Some(next),
                _ => break,
            }
        }

        Ok(out)
    }

    fn stream(&self, cancel: CancelToken) -> BoxStream<'static, Vec<RawLog>> {
        let client = self.client.clone();
        let app_name = self.app_name.clone();
        let next_token: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        super::poll_loop(DEFAULT_POLL_INTERVAL, cancel.clone(), NAME, move || {
            let client = client.clone();
            let app_name = app_name.clone();
            let next_token = next_token.clone();
            let cancel = cancel.clone();
            async move {
                let mut params = vec![("app_name", app_name.clone())];
                if let Some(t) = next_token.lock().clone() {
                    params.push(("page_token", t));
                }
                let envelope: Envelope = client.get_json("/entries", &params, &cancel).await.map_err(ConnectorError::Http)?;
                if let Some(next) = envelope.next_token.clone() {
                    *next_token.lock() = Some(next);
                }
                Ok(envelope.items.into_iter().filter_map(ProviderB::to_raw_log).collect())
            }
        })
    }

    fn default_poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn build_requires_app_name() {
        let err = build(&HashMap::new(), Some("tok".to_string())).unwrap_err();
        assert!(matches!(err, ConnectorError::MissingConfigKey(ref k, _) if k == "app_name"));
    }

    #[test]
    fn start_is_inclusive_end_is_exclusive() {
        let start = Utc::now();
        let end = start + ChronoDuration::seconds(60);
        assert!(in_window(start, start, end));
        assert!(!in_window(end, start, end));
        assert!(in_window(end - ChronoDuration::milliseconds(1), start, end));
    }

    #[test]
    fn consecutive_windows_never_overlap_on_the_boundary() {
        // P5: an entry exactly on t1 belongs to window [t1, t2), never to
        // the preceding [t0, t1).
        let t0 = Utc::now();
        let t1 = t0 + ChronoDuration::seconds(60);
        let t2 = t1 + ChronoDuration::seconds(60);
        assert!(!in_window(t1, t0, t1));
        assert!(in_window(t1, t1, t2));
    }

    #[test]
    fn nanosecond_rfc3339_timestamps_parse() {
        let item = Item {
            time: "2026-01-15T10:30:00.123456789Z".to_string(),
            text: "hello".to_string(),
            labels: HashMap::new(),
        };
        let log = ProviderB::to_raw_log(item).unwrap();
        assert_eq!(log.timestamp.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn unparseable_timestamp_is_skipped_not_fatal() {
        let item = Item {
            time: "not-a-timestamp".to_string(),
            text: "hello".to_string(),
            labels: HashMap::new(),
        };
        assert!(ProviderB::to_raw_log(item).is_none());
    }
}
