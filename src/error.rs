use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the core delta-sync engine.
///
/// Mirrors the system's error taxonomy: path safety violations, transport
/// failures, I/O failures, and malformed patch streams each get their own
/// variant so callers (the sender's best-effort per-file loop, the
/// receiver's HTTP status mapping) can match on them.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("path escapes root: {attempted}\nroot: {root}")]
    PathEscape { attempted: String, root: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed patch stream: {0}")]
    Protocol(String),

    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status code the receiver should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::PathEscape { .. } | SyncError::Protocol(_) => 400,
            SyncError::Io { .. } | SyncError::Config(_) => 500,
            SyncError::Transport { .. } => 502,
        }
    }
}
