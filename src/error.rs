use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while setting up channels, workers and reports.
///
/// Nothing on the message path returns these: sends report `false` and
/// malformed messages are dropped.
#[derive(Debug, Error)]
pub enum VistestError {
    #[error("failed to spawn worker `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker command is empty")]
    EmptyCommand,

    #[error("worker {0} has no {1} pipe")]
    MissingPipe(usize, &'static str),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid JSON at {path}:{line}: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, VistestError>;
