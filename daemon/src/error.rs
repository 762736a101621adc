//! Error types shared across the pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a whole sampling pass. Per-process failures never surface here.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("cannot enumerate process table at {path}: {source}")]
    Enumeration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} has header {found:?}, expected {expected:?}")]
    SchemaMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("{path} is not a sample log (header {found:?})")]
    BadHeader { path: PathBuf, found: String },
}

impl SinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SinkError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serializing config TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("creating log directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("log file path {0} has no file name")]
    FileName(PathBuf),

    #[error("installing global subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Failure of a snapshot or monitoring run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("sampling task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
