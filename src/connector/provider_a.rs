//! Provider A: cursor-paginated, server-side time filter (spec.md §4.2.a).
//!
//! Grounded on the shared [`super::poll_loop`] streaming pattern and the
//! teacher's `HttpClient`-backed `get_json` call shape, adapted to carry
//! an opaque cursor token across polls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::BoxStream;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::cancel::CancelToken;
use crate::error::ConnectorError;
use crate::http_client::HttpClient;
use crate::types::RawLog;

use super::{require_extra, Connector};

const NAME: &str = "provider_a";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const PAGE_SIZE: usize = 200;

#[derive(Deserialize)]
struct Page {
    entries: Vec<Entry>,
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct Entry {
    timestamp_ms: i64,
    message: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

pub struct ProviderA {
    client: HttpClient,
    project_id: String,
    team_id: Option<String>,
}

pub fn build(extra: &HashMap<String, String>, api_key: Option<String>) -> Result<Box<dyn Connector>, ConnectorError> {
    let project_id = require_extra(extra, "project_id", NAME)?;
    let team_id = extra.get("team_id").cloned();
    let token = api_key.ok_or_else(|| ConnectorError::MissingConfigKey("api_key".to_string(), NAME.to_string()))?;
    let client = HttpClient::new("https://provider-a.example.com/api/v1".to_string(), token);
    Ok(Box::new(ProviderA {
        client,
        project_id,
        team_id,
    }))
}

impl ProviderA {
    fn query_params(&self, from_ms: i64, to_ms: i64, cursor: Option<&str>, limit: Option<usize>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("project_id", self.project_id.clone()),
            ("start", from_ms.to_string()),
            ("end", to_ms.to_string()),
            ("page_size", limit.unwrap_or(PAGE_SIZE).to_string()),
        ];
        if let Some(team_id) = &self.team_id {
            params.push(("team_id", team_id.clone()));
        }
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        params
    }

    async fn fetch_page(
        &self,
        from_ms: i64,
        to_ms: i64,
        cursor: Option<String>,
        limit: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<Page, ConnectorError> {
        let params = self.query_params(from_ms, to_ms, cursor.as_deref(), limit);
        self.client
            .get_json("/logs", &params, cancel)
            .await
            .map_err(ConnectorError::Http)
    }

    fn to_raw_log(entry: Entry) -> RawLog {
        let timestamp = ms_to_datetime(entry.timestamp_ms);
        RawLog::new(timestamp, NAME, entry.message).with_metadata(entry.attributes)
    }
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl Connector for ProviderA {
    async fn query(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<Vec<RawLog>, ConnectorError> {
        let from_ms = from.timestamp_millis();
        let to_ms = to.timestamp_millis();
        let mut cursor = None;
        let mut out = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Err(ConnectorError::Http(crate::error::HttpError::Cancelled));
            }
            let remaining = limit.map(|l| l.saturating_sub(out.len()));
            let page = self.fetch_page(from_ms, to_ms, cursor.clone(), remaining, cancel).await?;
            let page_len = page.entries.len();
            out.extend(page.entries.into_iter().map(Self::to_raw_log));
            if let Some(l) = limit {
                if out.len() >= l {
                    out.truncate(l);
                    break;
                }
            }
            match page.next_cursor {
                Some(next) if page_len > 0 => cursor = Some(next),
                _ => break,
            }
        }

        Ok(out)
    }

    fn stream(&self, cancel: CancelToken) -> BoxStream<'static, Vec<RawLog>> {
        let client = self.client.clone();
        let project_id = self.project_id.clone();
        let team_id = self.team_id.clone();
        let cursor: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        super::poll_loop(DEFAULT_POLL_INTERVAL, cancel.clone(), NAME, move || {
            let client = client.clone();
            let project_id = project_id.clone();
            let team_id = team_id.clone();
            let cursor = cursor.clone();
            let cancel = cancel.clone();
            async move {
                let current_cursor = cursor.lock().clone();
                let mut params = vec![("project_id", project_id.clone())];
                if let Some(team_id) = &team_id {
                    params.push(("team_id", team_id.clone()));
                }
                if let Some(c) = &current_cursor {
                    params.push(("cursor", c.clone()));
                }
                let page: Page = client.get_json("/logs/stream", &params, &cancel).await.map_err(ConnectorError::Http)?;
                if let Some(next) = page.next_cursor.clone() {
                    *cursor.lock() = Some(next);
                }
                Ok(page.entries.into_iter().map(ProviderA::to_raw_log).collect())
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

    #[test]
    fn build_requires_project_id() {
        let err = build(&HashMap::new(), Some("tok".to_string())).unwrap_err();
        assert!(matches!(err, ConnectorError::MissingConfigKey(ref k, _) if k == "project_id"));
    }

    #[test]
    fn build_requires_api_key() {
        let mut extra = HashMap::new();
        extra.insert("project_id".to_string(), "p1".to_string());
        let err = build(&extra, None).unwrap_err();
        assert!(matches!(err, ConnectorError::MissingConfigKey(ref k, _) if k == "api_key"));
    }

    #[test]
    fn millisecond_timestamps_convert_to_utc() {
        let dt = ms_to_datetime(1_700_000_000_000);
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn team_id_is_optional_in_query_params() {
        let mut extra = HashMap::new();
        extra.insert("project_id".to_string(), "p1".to_string());
        let connector = build(&extra, Some("tok".to_string())).unwrap();
        let _ = connector;
    }
}
