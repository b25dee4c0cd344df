//! Typed error taxonomy for the component boundaries that need to be
//! matched on by callers (config validation, model loading, connector
//! polling, output writes). Code that only needs to propagate-and-annotate
//! a failure uses `anyhow::Result` instead — the same split the teacher
//! draws between its library modules (typed, contextual errors) and
//! `main.rs` (plain `anyhow::Result<()>`).

use thiserror::Error;

/// Fatal at startup. Collected in full by [`crate::config::Config::validate`]
/// rather than returned on the first failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} bullet point(s) failed validation:\n{}", .0.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Invalid(Vec<String>),
}

/// Fatal at startup: missing model files, corrupt tensors, dimension
/// mismatch between the inference graph's output and the projection
/// matrix's input.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    MissingFile(String),
    #[error("failed to load vocabulary from {path}: {source}")]
    Vocab {
        path: String,
        #[source]
        source: tokenizers::Error,
    },
    #[error("failed to load model weights: {0}")]
    Weights(#[source] candle_core::Error),
    #[error("corrupt projection tensor file {path}: {reason}")]
    Projection { path: String, reason: String },
    #[error(
        "embedding dimension mismatch: inference output has inner dim {inference_dim}, \
         projection matrix expects input dim {projection_input_dim}"
    )]
    DimensionMismatch {
        inference_dim: usize,
        projection_input_dim: usize,
    },
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

/// Recoverable: a single poll failed, a single table failed, a required
/// provider config key was missing. The cursor is always preserved.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("missing required config key '{0}' for connector '{1}'")]
    MissingConfigKey(String, String),
    #[error("no connector registered under name '{0}'")]
    UnknownProvider(String),
    #[error("table '{0}' is not in the allow-list")]
    DisallowedTable(String),
    #[error("http request failed: {0}")]
    Http(#[from] HttpError),
    #[error("{0}")]
    Other(String),
}

/// HTTP client failures, carrying enough of the response to diagnose a
/// failed call without re-fetching it.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error: status {status}, body: {body}")]
    Api { status: u16, body: String },
    #[error("request cancelled")]
    Cancelled,
}

/// A sink's `Write`/`Close` failure. Direct sinks surface this as fatal;
/// async-wrapped sinks route it to an error callback instead.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] HttpError),
    #[error("sink closed")]
    Closed,
}
