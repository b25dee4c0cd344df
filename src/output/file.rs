//! NDJSON file sink with numbered rotation (spec.md §4.11).
//!
//! One JSON object per line, behind a buffered writer so the common case
//! is an in-memory append rather than a syscall per event. Rotation is
//! synchronous and numbered: `.1` replaces the prior `.1` only after it's
//! renamed to `.2`; no compression.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{filtered_for_verbosity, Sink};
use crate::config::Verbosity;
use crate::error::OutputError;
use crate::types::CanonicalEvent;

const DEFAULT_BUFFER_BYTES: usize = 64 * 1024;
const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

struct State {
    writer: BufWriter<File>,
    bytes_written: u64,
}

pub struct FileSink {
    path: PathBuf,
    max_size: u64,
    verbosity: Verbosity,
    state: Mutex<State>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, verbosity: Verbosity) -> std::io::Result<Self> {
        Self::with_max_size(path, verbosity, DEFAULT_MAX_SIZE_BYTES)
    }

    pub fn with_max_size(path: impl Into<PathBuf>, verbosity: Verbosity, max_size: u64) -> std::io::Result<Self> {
        let path = path.into();
        let (writer, bytes_written) = open_for_append(&path)?;
        Ok(Self {
            path,
            max_size,
            verbosity,
            state: Mutex::new(State { writer, bytes_written }),
        })
    }

    /// Renames the current primary to `.1` (having first bumped any
    /// existing `.1` to `.2`, overwriting a stale `.2`), then opens a
    /// fresh, empty primary file.
    fn rotate(&self, state: &mut State) -> std::io::Result<()> {
        state.writer.flush()?;

        let rotated_2 = with_suffix(&self.path, 2);
        let rotated_1 = with_suffix(&self.path, 1);
        if rotated_1.exists() {
            std::fs::rename(&rotated_1, &rotated_2)?;
        }
        if self.path.exists() {
            std::fs::rename(&self.path, &rotated_1)?;
        }

        let (writer, bytes_written) = open_for_append(&self.path)?;
        state.writer = writer;
        state.bytes_written = bytes_written;
        Ok(())
    }
}

fn with_suffix(path: &Path, n: u32) -> PathBuf {
    let mut os_string = path.as_os_str().to_owned();
    os_string.push(format!(".{n}"));
    PathBuf::from(os_string)
}

fn open_for_append(path: &Path) -> std::io::Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok((BufWriter::with_capacity(DEFAULT_BUFFER_BYTES, file), len))
}

#[async_trait]
impl Sink for FileSink {
    async fn write(&self, event: &CanonicalEvent) -> Result<(), OutputError> {
        let filtered = filtered_for_verbosity(event, self.verbosity);
        let mut line = serde_json::to_vec(&filtered)?;
        line.push(b'\n');

        let mut state = self.state.lock();
        if self.max_size > 0 && state.bytes_written + line.len() as u64 > self.max_size {
            self.rotate(&mut state)?;
        }
        state.writer.write_all(&line)?;
        state.bytes_written += line.len() as u64;
        Ok(())
    }

    async fn close(&self) -> Result<(), OutputError> {
        let mut state = self.state.lock();
        state.writer.flush()?;
        Ok(())
    }
}
