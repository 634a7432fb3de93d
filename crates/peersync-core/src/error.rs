//! Error types for the replication core.

use std::path::PathBuf;

/// Failures reading or writing the change journal.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Journal I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize change record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unreadable journal record at byte {offset} of {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        offset: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures applying a single change or snapshot entry.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid content encoding for {0}: {1}")]
    Encoding(String, String),

    #[error("Modification time {1} for {0} is out of range")]
    InvalidMtime(String, f64),
}

impl ApplyError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ApplyError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reasons an inbound change payload is rejected.
#[derive(Debug, thiserror::Error)]
pub enum ChangeValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unknown change type: {0}")]
    UnknownKind(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Content is not valid base64: {0}")]
    InvalidContent(String),

    #[error("Invalid timestamp {0:?}, expected YYYY-MM-DDTHH:MM:SS.ffffffZ")]
    InvalidTimestamp(String),
}

/// Configuration problems that prevent a node from starting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Watch root {} is not usable: {reason}", .path.display())]
    WatchRoot { path: PathBuf, reason: String },

    #[error("Invalid peer address {0}: {1}")]
    PeerAddress(String, String),
}
