//! Lumber normalizes heterogeneous cloud log streams into a single,
//! semantically classified, token-efficient event schema.
//!
//! The binary (`src/main.rs`) wires these modules into a running process;
//! everything here is also usable as a library by anything that wants to
//! embed the pipeline (an in-process worker, a test harness) without
//! shelling out to the CLI.

pub mod cancel;
pub mod classifier;
pub mod compactor;
pub mod config;
pub mod connector;
pub mod dedup;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod http_client;
pub mod output;
pub mod pipeline;
pub mod shutdown;
pub mod taxonomy;
pub mod types;

pub use cancel::CancelToken;
pub use config::{Cli, Config, Mode, Verbosity};
pub use engine::Engine;
pub use error::{ConfigError, ConnectorError, HttpError, ModelError, OutputError};
pub use pipeline::Pipeline;
pub use types::{CanonicalEvent, RawLog, Severity};
