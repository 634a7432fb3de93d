/// Request and response bodies for the HTTP surface
use peersync_core::snapshot::FileStatus;
use peersync_core::ChangeRecord;
use serde::{Deserialize, Serialize};

/// Query string of `GET /get_changes`
#[derive(Debug, Default, Deserialize)]
pub struct ChangesQuery {
    /// Cursor; records strictly newer are returned. Absent means everything.
    pub since: Option<String>,
}

/// `{status: "ok"}`
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusOk {
    pub status: String,
}

impl StatusOk {
    pub fn new() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

impl Default for StatusOk {
    fn default() -> Self {
        Self::new()
    }
}

/// `{status: "error", message}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

/// Result of `POST /api/push`
#[derive(Debug, Serialize, Deserialize)]
pub struct PushResult {
    pub status: String,
    pub changes_pushed: usize,
    pub peer: String,
}

/// Result of `POST /api/pull`
#[derive(Debug, Serialize, Deserialize)]
pub struct PullResult {
    pub status: String,
    pub peer: String,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Body of `GET /api/status`
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub connected: bool,
    pub active_peer: Option<String>,
    /// Local changes not yet pushed, without content
    pub pending: Vec<ChangeRecord>,
    pub files: Vec<FileStatus>,
}

/// Body of `GET /health`
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub version: String,
    pub uptime_seconds: u64,
}
