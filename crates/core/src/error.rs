use std::path::PathBuf;

use thiserror::Error;

/// Configuration problems detected at startup. All of them are fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Errors raised by the append-and-scan JSONL stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record at {path}:{line}: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
