//! Configuration surface consumed by the core: a validated struct built
//! from environment variables and CLI flags, with the precedence rule from
//! spec.md §6 — only flags explicitly present on the command line override
//! their env-var counterpart; a flag's mere default never does.
//!
//! `clap`'s derive API maps directly onto this: `ArgMatches::value_source`
//! distinguishes a value the user typed from one `clap` filled in from
//! `#[arg(env = "...")]` or a `default_value`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, ValueEnum};

use crate::error::ConfigError;

/// Truncation policy (spec.md §4.7, GLOSSARY).
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum Verbosity {
    Minimal,
    Standard,
    Full,
}

/// Stream mode runs a connector's poll loop continuously; Query mode is a
/// one-shot bounded historical fetch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum Mode {
    Stream,
    Query,
}

/// Raw CLI surface. Fields use `clap`'s `env` attribute so the same flag
/// can be supplied either way; `clap`'s own precedence order — explicit
/// command line value, then env var, then default — already implements
/// spec.md §6's "only an explicit flag overrides an env var" rule, so no
/// manual `ArgMatches::value_source` bookkeeping is needed here.
#[derive(Parser, Debug)]
#[command(name = "lumber", version, about = "Normalize heterogeneous cloud log streams into a classified event schema")]
pub struct Cli {
    /// Connector to use (must be registered; see the connector registry).
    #[arg(long, env = "LUMBER_CONNECTOR")]
    pub connector: Option<String>,

    /// Bearer token for the connector's API.
    #[arg(long, env = "LUMBER_API_KEY")]
    pub api_key: Option<String>,

    /// stream (continuous poll) or query (one-shot historical fetch).
    #[arg(long, value_enum, env = "LUMBER_MODE", default_value = "stream")]
    pub mode: Mode,

    /// Query-mode window start, RFC 3339.
    #[arg(long, env = "LUMBER_QUERY_FROM")]
    pub query_from: Option<String>,

    /// Query-mode window end, RFC 3339.
    #[arg(long, env = "LUMBER_QUERY_TO")]
    pub query_to: Option<String>,

    /// Query-mode result limit (0 = unlimited).
    #[arg(long, env = "LUMBER_QUERY_LIMIT", default_value_t = 0)]
    pub query_limit: usize,

    /// Compaction verbosity.
    #[arg(long, value_enum, env = "LUMBER_VERBOSITY", default_value = "standard")]
    pub verbosity: Verbosity,

    /// Pretty-print the stdout sink's JSON.
    #[arg(long, env = "LUMBER_PRETTY", action = ArgAction::SetTrue)]
    pub pretty: bool,

    /// tracing-subscriber env-filter directive, e.g. "info" or "debug".
    #[arg(long, env = "LUMBER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// NDJSON file sink path. Omit to disable the file sink.
    #[arg(long, env = "LUMBER_FILE_PATH")]
    pub file_path: Option<PathBuf>,

    /// Webhook sink URL. Omit to disable the webhook sink.
    #[arg(long, env = "LUMBER_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Classification confidence threshold, [0, 1].
    #[arg(long, env = "LUMBER_THRESHOLD", default_value_t = 0.5)]
    pub threshold: f32,

    /// Dedup window, seconds. 0 disables deduplication.
    #[arg(long, env = "LUMBER_DEDUP_WINDOW_SECS", default_value_t = 0)]
    pub dedup_window_secs: u64,

    /// Maximum pending events before a forced dedup flush. 0 disables the bound.
    #[arg(long, env = "LUMBER_DEDUP_MAX_BUFFER", default_value_t = 1000)]
    pub dedup_max_buffer: usize,

    /// Seconds to wait for a clean drain after the first shutdown signal.
    #[arg(long, env = "LUMBER_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Poll interval override, seconds. 0 uses the connector's own default.
    #[arg(long, env = "LUMBER_POLL_INTERVAL_SECS", default_value_t = 0)]
    pub poll_interval_secs: u64,

    /// Directory containing the model graph, vocabulary, and projection
    /// weights (spec.md §6 persisted-state layout).
    #[arg(long, env = "LUMBER_MODELS_DIR", default_value = "models")]
    pub models_dir: PathBuf,

    /// Provider-specific extra keys as `key=value` pairs (project_id,
    /// app_name, project_ref, tables, team_id, ...).
    #[arg(long = "extra", env = "LUMBER_EXTRA", value_delimiter = ',')]
    pub extra: Vec<String>,
}

/// The validated configuration surface the core actually consumes.
#[derive(Clone, Debug)]
pub struct Config {
    pub connector: Option<String>,
    pub api_key: Option<String>,
    pub mode: Mode,
    pub query_from: Option<DateTime<Utc>>,
    pub query_to: Option<DateTime<Utc>>,
    pub query_limit: Option<usize>,
    pub verbosity: Verbosity,
    pub pretty: bool,
    pub log_level: String,
    pub file_path: Option<PathBuf>,
    pub webhook_url: Option<String>,
    pub threshold: f32,
    pub dedup_window_secs: u64,
    pub dedup_max_buffer: usize,
    pub shutdown_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub models_dir: PathBuf,
    pub extra: std::collections::HashMap<String, String>,
}

impl Cli {
    /// Parses `key=value` extras, validates, and produces a [`Config`].
    /// Collects every validation failure rather than stopping at the
    /// first — spec.md §6/§8 (P10): the result's error message carries one
    /// line per distinct failure.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let mut errors = Vec::new();

        if self.connector.is_some() && self.api_key.is_none() {
            errors.push("a connector is configured but no API key was provided".to_string());
        }

        for path in crate::embedder::default_models_dir_paths(&self.models_dir) {
            if !path.exists() {
                errors.push(format!("model file not found: {}", path.display()));
            }
        }

        if !(0.0..=1.0).contains(&self.threshold) {
            errors.push(format!(
                "classification threshold must be in [0, 1], got {}",
                self.threshold
            ));
        }

        let mut query_from = None;
        let mut query_to = None;
        if matches!(self.mode, Mode::Query) {
            match &self.query_from {
                Some(raw) if !raw.is_empty() => match DateTime::parse_from_rfc3339(raw) {
                    Ok(dt) => query_from = Some(dt.with_timezone(&Utc)),
                    Err(e) => errors.push(format!("invalid --query-from '{raw}': {e}")),
                },
                _ => errors.push("mode=query requires a non-zero --query-from".to_string()),
            }
            match &self.query_to {
                Some(raw) if !raw.is_empty() => match DateTime::parse_from_rfc3339(raw) {
                    Ok(dt) => query_to = Some(dt.with_timezone(&Utc)),
                    Err(e) => errors.push(format!("invalid --query-to '{raw}': {e}")),
                },
                _ => errors.push("mode=query requires a non-zero --query-to".to_string()),
            }
        }

        let mut extra = std::collections::HashMap::new();
        for pair in &self.extra {
            match pair.split_once('=') {
                Some((k, v)) => {
                    extra.insert(k.to_string(), v.to_string());
                }
                None => errors.push(format!("malformed --extra entry (expected key=value): {pair}")),
            }
        }

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        Ok(Config {
            connector: self.connector,
            api_key: self.api_key,
            mode: self.mode,
            query_from,
            query_to,
            query_limit: if self.query_limit == 0 { None } else { Some(self.query_limit) },
            verbosity: self.verbosity,
            pretty: self.pretty,
            log_level: self.log_level,
            file_path: self.file_path,
            webhook_url: self.webhook_url,
            threshold: self.threshold,
            dedup_window_secs: self.dedup_window_secs,
            dedup_max_buffer: self.dedup_max_buffer,
            shutdown_timeout_secs: self.shutdown_timeout_secs,
            poll_interval_secs: self.poll_interval_secs,
            models_dir: self.models_dir,
            extra,
        })
    }
}
