//! Append-and-scan JSONL storage.
//!
//! Every durable table in vetbot (backlog, visited set, reported set) is a
//! file of newline-delimited JSON records. Tables are read fully on startup
//! and appended one record at a time afterwards; each append is flushed
//! before it returns so a killed process loses at most the record being
//! written.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Read every record of a JSONL file, failing on the first malformed line.
///
/// Blank lines are ignored. Used for inputs that must be trusted verbatim,
/// such as the backlog.
pub fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut records = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| StoreError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| StoreError::Malformed {
            path: path.to_path_buf(),
            line: idx + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }

    Ok(records)
}

/// An append-only JSONL table.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlStore {
    /// Open (creating if missing) a table for appending and return the
    /// records already in it.
    ///
    /// Lines that fail to parse are skipped with a warning: the only way
    /// they arise is a torn write from an interrupted process, and every
    /// complete record before them is still valid. A missing trailing
    /// newline is repaired so the next append starts on its own line.
    pub fn open<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<(Self, Vec<T>), StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| StoreError::io(&path, e))?;

        let mut records = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "skipping unreadable record"
                ),
            }
        }

        if !contents.is_empty() && !contents.ends_with('\n') {
            file.seek(SeekFrom::End(0))
                .and_then(|_| file.write_all(b"\n"))
                .map_err(|e| StoreError::io(&path, e))?;
        }

        debug!(path = %path.display(), records = records.len(), "opened store");

        Ok((Self::from_file(path, file), records))
    }

    /// Wrap a file already opened for appending. Reads nothing.
    pub fn from_file(path: impl Into<PathBuf>, file: File) -> Self {
        Self {
            path: path.into(),
            writer: BufWriter::new(file),
        }
    }

    /// Append one record and flush it to the OS.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<(), StoreError> {
        let line =
            serde_json::to_string(record).map_err(|e| StoreError::Serialize(e.to_string()))?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush())
            .map_err(|e| StoreError::io(&self.path, e))
    }

    /// Flush and fsync. Called on orderly shutdown.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.writer
            .flush()
            .and_then(|_| self.writer.get_ref().sync_all())
            .map_err(|e| StoreError::io(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
