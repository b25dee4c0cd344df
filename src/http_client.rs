//! Bearer-authenticated JSON GET with retry, grounded on `reqwest`'s
//! standard builder API. Every concrete connector shares one of these
//! rather than building its own `reqwest::Client` — connection pooling and
//! the retry/backoff policy live in exactly one place.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::cancel::CancelToken;
use crate::error::HttpError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];
const MAX_ERROR_BODY_BYTES: usize = 512;

/// A bearer-authenticated HTTP client shared across connectors. Cheap to
/// clone: `reqwest::Client` is itself an `Arc` handle around its
/// connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder is infallible with these options");
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Fetches `base_url + path + query`, deserializing the JSON body into
    /// `T`. Retries on 429 (honoring `Retry-After` when present) and 5xx
    /// with the `{1s, 2s, 4s}` backoff schedule, up to [`MAX_RETRIES`]
    /// attempts. Any other non-2xx status is an immediate, non-retried
    /// [`HttpError::Api`].
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        cancel: &CancelToken,
    ) -> Result<T, HttpError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(HttpError::Cancelled);
            }

            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .query(query)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response.json::<T>().await?);
            }

            if status.as_u16() == 429 && attempt < MAX_RETRIES {
                let wait = retry_after(&response).unwrap_or(BACKOFF_SCHEDULE[attempt as usize]);
                tracing::warn!(%status, attempt, wait_secs = wait.as_secs(), "rate limited, retrying");
                if !sleep_cancelable(wait, cancel).await {
                    return Err(HttpError::Cancelled);
                }
                attempt += 1;
                continue;
            }

            if status.is_server_error() && attempt < MAX_RETRIES {
                let wait = BACKOFF_SCHEDULE[attempt as usize];
                tracing::warn!(%status, attempt, wait_secs = wait.as_secs(), "server error, retrying");
                if !sleep_cancelable(wait, cancel).await {
                    return Err(HttpError::Cancelled);
                }
                attempt += 1;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(HttpError::Api {
                status: status.as_u16(),
                body: truncate_body_bytes(&body, MAX_ERROR_BODY_BYTES),
            });
        }
    }
}

/// Cuts `body` to the first `limit` bytes, backing off to the nearest
/// preceding `char` boundary so the cut never splits a multi-byte UTF-8
/// sequence (the byte-index-slicing bug class spec.md §4.7 calls out by
/// name, applied here to error bodies instead of compacted text).
fn truncate_body_bytes(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }
    let mut cut = limit;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body[..cut].to_string()
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Sleeps for `wait`, returning early with `false` if `cancel` fires first.
async fn sleep_cancelable(wait: Duration, cancel: &CancelToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => true,
        _ = cancel.cancelled() => false,
    }
}
