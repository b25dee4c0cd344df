//! Provider C: SQL-over-REST, multi-table (spec.md §4.2.c).
//!
//! The fixed 7-entry table allow-list is the sole defense against SQL
//! injection when table names are interpolated into the query text — any
//! name outside it is rejected before a request is ever built (spec.md
//! §8, P7).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures_util::stream::BoxStream;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::error::ConnectorError;
use crate::http_client::HttpClient;
use crate::types::RawLog;

use super::{require_extra, Connector};

const NAME: &str = "provider_c";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const MAX_CHUNK: ChronoDuration = ChronoDuration::hours(24);

pub const TABLE_ALLOW_LIST: [&str; 7] = [
    "app_logs",
    "request_logs",
    "error_logs",
    "audit_logs",
    "auth_logs",
    "db_logs",
    "deploy_logs",
];

#[derive(Deserialize)]
struct QueryResponse {
    rows: Vec<Row>,
}

#[derive(Deserialize)]
struct Row {
    ts_micros: i64,
    message: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

pub struct ProviderC {
    client: HttpClient,
    project_ref: String,
    tables: Vec<String>,
}

pub fn build(extra: &HashMap<String, String>, api_key: Option<String>) -> Result<Box<dyn Connector>, ConnectorError> {
    let project_ref = require_extra(extra, "project_ref", NAME)?;
    let token = api_key.ok_or_else(|| ConnectorError::MissingConfigKey("api_key".to_string(), NAME.to_string()))?;
    let client = HttpClient::new("https://provider-c.example.com/sql".to_string(), token);

    let tables = match extra.get("tables") {
        Some(raw) => raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => TABLE_ALLOW_LIST.iter().map(|s| s.to_string()).collect(),
    };
    for table in &tables {
        validate_table(table)?;
    }

    Ok(Box::new(ProviderC { client, project_ref, tables }))
}

/// Rejects any table name outside the fixed allow-list, with a non-empty
/// error naming the offending table.
fn validate_table(table: &str) -> Result<(), ConnectorError> {
    if TABLE_ALLOW_LIST.contains(&table) {
        Ok(())
    } else {
        Err(ConnectorError::DisallowedTable(table.to_string()))
    }
}

fn build_sql(table: &str, from: DateTime<Utc>, to: DateTime<Utc>, limit: Option<usize>) -> String {
    let mut sql = format!(
        "SELECT ts_micros, message, attributes FROM {table} WHERE ts_micros >= {} AND ts_micros < {} ORDER BY ts_micros ASC",
        from.timestamp_micros(),
        to.timestamp_micros(),
    );
    if let Some(l) = limit {
        sql.push_str(&format!(" LIMIT {l}"));
    }
    sql
}

/// Splits `[from, to)` into consecutive chunks no longer than
/// [`MAX_CHUNK`] — the provider's own enforced maximum query window.
fn chunk_window(from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut chunks = Vec::new();
    let mut cursor = from;
    while cursor < to {
        let chunk_end = (cursor + MAX_CHUNK).min(to);
        chunks.push((cursor, chunk_end));
        cursor = chunk_end;
    }
    chunks
}

/// Preserves the sub-microsecond (nanosecond) remainder as zero, since
/// the wire format never carries finer precision than microseconds.
fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros).single().unwrap_or_else(Utc::now)
}

impl ProviderC {
    async fn query_table(
        &self,
        table: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<Vec<RawLog>, ConnectorError> {
        let sql = build_sql(table, from, to, limit);
        let params = vec![("project_ref", self.project_ref.clone()), ("query", sql)];
        let response: QueryResponse = self.client.get_json("/query", &params, cancel).await.map_err(ConnectorError::Http)?;
        Ok(response
            .rows
            .into_iter()
            .map(|row| {
                let timestamp = micros_to_datetime(row.ts_micros);
                RawLog::new(timestamp, NAME, row.message).with_metadata(row.attributes)
            })
            .collect())
    }
}

#[async_trait]
impl Connector for ProviderC {
    async fn query(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<Vec<RawLog>, ConnectorError> {
        let mut out = Vec::new();
        let mut any_succeeded = false;
        let mut last_error = None;

        for (chunk_from, chunk_to) in chunk_window(from, to) {
            for table in &self.tables {
                if cancel.is_cancelled() {
                    return Err(ConnectorError::Http(crate::error::HttpError::Cancelled));
                }
                match self.query_table(table, chunk_from, chunk_to, limit, cancel).await {
                    Ok(rows) => {
                        any_succeeded = true;
                        out.extend(rows);
                    }
                    Err(err) => {
                        tracing::warn!(table, error = %err, "query failed for table, continuing with remaining tables");
                        last_error = Some(err);
                    }
                }
            }
        }

        if !any_succeeded && last_error.is_some() {
            return Err(last_error.unwrap());
        }

        // Merged across tables and chunks; sorted by timestamp (spec.md §5).
        out.sort_by_key(|log| log.timestamp);
        if let Some(l) = limit {
            out.truncate(l);
        }
        Ok(out)
    }

    fn stream(&self, cancel: CancelToken) -> BoxStream<'static, Vec<RawLog>> {
        let client = self.client.clone();
        let project_ref = self.project_ref.clone();
        let tables = self.tables.clone();
        // Cursor state is the maximum-observed timestamp per table
        // (spec.md §4.2.c), seeded at the worker's start time so the
        // first poll only picks up genuinely new rows.
        let cursors: Arc<Mutex<HashMap<String, DateTime<Utc>>>> = Arc::new(Mutex::new(
            tables.iter().map(|t| (t.clone(), Utc::now())).collect(),
        ));

        super::poll_loop(DEFAULT_POLL_INTERVAL, cancel.clone(), NAME, move || {
            let client = client.clone();
            let project_ref = project_ref.clone();
            let tables = tables.clone();
            let cursors = cursors.clone();
            let cancel = cancel.clone();
            async move {
                let now = Utc::now();
                let mut batch = Vec::new();
                for table in &tables {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let since = *cursors.lock().get(table).unwrap_or(&now);
                    let sql = build_sql(table, since, now, None);
                    let params = vec![("project_ref", project_ref.clone()), ("query", sql)];
                    match client.get_json::<QueryResponse>("/query", &params, &cancel).await {
                        Ok(response) => {
                            let mut max_ts = since;
                            for row in response.rows {
                                let timestamp = micros_to_datetime(row.ts_micros);
                                if timestamp > max_ts {
                                    max_ts = timestamp;
                                }
                                batch.push(RawLog::new(timestamp, NAME, row.message).with_metadata(row.attributes));
                            }
                            cursors.lock().insert(table.clone(), max_ts);
                        }
                        Err(err) => {
                            tracing::warn!(table, error = %err, "poll failed for table, continuing with remaining tables");
                        }
                    }
                }
                Ok(batch)
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
    fn allow_listed_table_passes_validation() {
        assert!(validate_table("app_logs").is_ok());
    }

    #[test]
    fn disallowed_table_is_rejected_with_a_named_error() {
        let err = validate_table("users; DROP TABLE users;--").unwrap_err();
        match err {
            ConnectorError::DisallowedTable(name) => assert!(name.contains("DROP")),
            other => panic!("expected DisallowedTable, got {other:?}"),
        }
    }

    #[test]
    fn build_rejects_disallowed_table_in_extras() {
        let mut extra = HashMap::new();
        extra.insert("project_ref".to_string(), "ref1".to_string());
        extra.insert("tables".to_string(), "app_logs,not_a_real_table".to_string());
        let err = build(&extra, Some("tok".to_string())).unwrap_err();
        assert!(matches!(err, ConnectorError::DisallowedTable(_)));
    }

    #[test]
    fn build_defaults_to_the_full_allow_list_when_tables_is_omitted() {
        let mut extra = HashMap::new();
        extra.insert("project_ref".to_string(), "ref1".to_string());
        let _connector = build(&extra, Some("tok".to_string())).unwrap();
    }

    #[test]
    fn window_longer_than_24h_splits_into_consecutive_chunks() {
        let from = Utc::now();
        let to = from + ChronoDuration::hours(50);
        let chunks = chunk_window(from, to);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].0, from);
        assert_eq!(chunks.last().unwrap().1, to);
        for (a, b) in &chunks {
            assert!(*b - *a <= MAX_CHUNK);
        }
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn window_under_24h_is_a_single_chunk() {
        let from = Utc::now();
        let to = from + ChronoDuration::hours(2);
        assert_eq!(chunk_window(from, to).len(), 1);
    }

    #[test]
    fn microsecond_round_trips_preserve_zero_nanosecond_remainder() {
        let dt = micros_to_datetime(1_700_000_000_123_456);
        assert_eq!(dt.timestamp_subsec_nanos() % 1000, 0);
    }

    #[test]
    fn sql_builder_never_embeds_a_table_name_outside_the_call_site_check() {
        let sql = build_sql("app_logs", Utc::now(), Utc::now(), Some(10));
        assert!(sql.starts_with("SELECT"));
        assert!(sql.contains("app_logs"));
        assert!(sql.contains("LIMIT 10"));
    }
}
