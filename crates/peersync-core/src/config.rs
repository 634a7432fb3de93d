//! Node configuration, loaded from TOML and overridden from the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Port assumed for peers given without one.
pub const DEFAULT_PEER_PORT: u16 = 5000;

/// Everything a node needs to know about itself and its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Origin stamped on locally captured changes
    pub node_id: String,
    /// Directory tree being replicated
    pub watch_root: PathBuf,
    /// Change journal file (JSON lines)
    pub journal_path: PathBuf,
    /// HTTP bind host
    pub host: String,
    /// HTTP bind port
    pub port: u16,
    /// Peer addresses, probed in this order
    pub peers: Vec<String>,
    pub poll_interval_ms: u64,
    pub rediscovery_interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub transfer_timeout_secs: u64,
    pub debounce_ms: u64,
    /// Discover a peer and apply its snapshot before watching
    pub bootstrap_on_start: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            watch_root: PathBuf::from("test_chamber"),
            journal_path: PathBuf::from("change_log.jsonl"),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PEER_PORT,
            peers: Vec::new(),
            poll_interval_ms: 3_000,
            rediscovery_interval_secs: 30,
            probe_timeout_ms: 3_000,
            transfer_timeout_secs: 30,
            debounce_ms: 500,
            bootstrap_on_start: true,
        }
    }
}

impl NodeConfig {
    /// Load a config file; keys that are absent keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `<platform config dir>/config.toml`, when the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "peersync").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the default config file if it exists, otherwise use defaults.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Peer base URLs, normalized.
    pub fn peer_urls(&self) -> Result<Vec<String>, ConfigError> {
        self.peers.iter().map(|p| normalize_peer(p)).collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rediscovery_interval(&self) -> Duration {
        Duration::from_secs(self.rediscovery_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn with_watch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.watch_root = root.into();
        self
    }

    pub fn with_journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = path.into();
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

/// The host name, or `"unknown"` when it cannot be determined.
pub fn default_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Turn `host`, `host:port` or a URL into `scheme://host:port` without a
/// trailing slash.
pub fn normalize_peer(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::PeerAddress(
            raw.to_string(),
            "empty address".to_string(),
        ));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let mut url = reqwest::Url::parse(&with_scheme)
        .map_err(|e| ConfigError::PeerAddress(raw.to_string(), e.to_string()))?;
    if url.host_str().is_none() {
        return Err(ConfigError::PeerAddress(
            raw.to_string(),
            "missing host".to_string(),
        ));
    }
    let bare_host = !trimmed.contains("://")
        && !trimmed
            .rsplit_once(':')
            .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    if bare_host {
        url.set_port(Some(DEFAULT_PEER_PORT))
            .map_err(|_| ConfigError::PeerAddress(raw.to_string(), "cannot set port".to_string()))?;
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}
