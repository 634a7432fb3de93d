//! Command-line interface for running a node.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use peersync_core::NodeConfig;

#[derive(Debug, Parser)]
#[command(name = "peersync")]
#[command(version)]
#[command(about = "Replicate a directory tree between peers over HTTP")]
pub struct Cli {
    /// Peer addresses (host, host:port or URL), probed in order
    pub peers: Vec<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory to replicate
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Change journal file
    #[arg(short, long)]
    pub journal: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind the HTTP server to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Identifier stamped on local changes (defaults to the host name)
    #[arg(long)]
    pub node_id: Option<String>,

    /// Skip peer discovery and snapshot reconciliation at startup
    #[arg(long)]
    pub no_bootstrap: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Defaults, then the config file, then flags.
    pub fn resolve_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::load_or_default()?,
        };

        if let Some(root) = &self.root {
            config = config.with_watch_root(root);
        }
        if let Some(journal) = &self.journal {
            config = config.with_journal_path(journal);
        }
        if let Some(host) = &self.host {
            config = config.with_host(host);
        }
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(node_id) = &self.node_id {
            config = config.with_node_id(node_id);
        }
        if !self.peers.is_empty() {
            config = config.with_peers(self.peers.clone());
        }
        if self.no_bootstrap {
            config.bootstrap_on_start = false;
        }
        Ok(config)
    }
}
