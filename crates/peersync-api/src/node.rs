//! Wires the replication components together and runs them.
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::{ApiConfig, ApiServer, AppState};
use crate::sync::{SyncCoordinator, SyncCoordinatorConfig};
use peersync_core::capture::{spawn_watcher, WatcherHandle};
use peersync_core::types::now_timestamp;
use peersync_core::{
    ApplyEngine, ChangeCapture, ChangeJournal, ConfigError, EventBus, IgnoredPaths, NodeConfig,
    PeerDirectory, PendingOutbox,
};

/// Entry point for running a node
pub struct Node;

impl Node {
    /// Run until `shutdown_signal` resolves
    pub async fn run(
        config: NodeConfig,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let node = Self::start(config).await?;
        shutdown_signal.await;
        node.shutdown().await;
        Ok(())
    }

    /// Start every component and return a handle to the running node
    pub async fn start(config: NodeConfig) -> Result<RunningNode> {
        let root = prepare_root(&config.watch_root)?;
        let journal_path = absolute_journal_path(&config.journal_path)?;

        let journal = Arc::new(
            ChangeJournal::open(&journal_path)
                .await
                .context("Failed to open change journal")?,
        );
        let events = EventBus::new();
        let ignored = Arc::new(IgnoredPaths::default());
        let outbox = Arc::new(PendingOutbox::new());

        let apply = Arc::new(
            ApplyEngine::new(&root, config.node_id.clone())
                .with_protected_path(journal.path())
                .with_ignored_paths(ignored.clone())
                .with_events(events.clone()),
        );
        let peers = Arc::new(
            PeerDirectory::new(
                config.peer_urls()?,
                config.probe_timeout(),
                config.transfer_timeout(),
            )
            .with_events(events.clone()),
        );
        let coordinator = Arc::new(SyncCoordinator::new(
            journal.clone(),
            outbox.clone(),
            apply.clone(),
            peers.clone(),
            SyncCoordinatorConfig::from(&config),
            now_timestamp(),
        ));

        info!(
            "Node {} replicating {} with {} peer(s)",
            config.node_id,
            root.display(),
            peers.peers().len()
        );

        if config.bootstrap_on_start
            && !peers.peers().is_empty()
            && coordinator.discover().await.is_none()
        {
            warn!("No peer answered at startup, starting offline");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let capture = Arc::new(
            ChangeCapture::new(
                &root,
                config.node_id.clone(),
                journal.clone(),
                outbox.clone(),
                config.debounce_window(),
            )
            .with_ignored_paths(ignored)
            .with_events(events.clone()),
        );
        let watcher = spawn_watcher(capture, shutdown_rx.clone())?;

        let state = AppState::new(journal, outbox, apply, coordinator.clone(), events);
        let server = ApiServer::new(
            ApiConfig::new()
                .with_host(config.host.clone())
                .with_port(config.port),
            state.clone(),
        );
        let listener = server.bind().await?;
        let local_addr = listener.local_addr().context("Listener has no address")?;

        let mut server_shutdown = shutdown_rx.clone();
        let server_task = tokio::spawn(async move {
            let signal = async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            };
            if let Err(e) = server.serve(listener, signal).await {
                error!("Server failed: {:#}", e);
            }
        });

        let loops = vec![
            tokio::spawn(coordinator.clone().run_poll_loop(shutdown_rx.clone())),
            tokio::spawn(coordinator.run_rediscovery_loop(shutdown_rx)),
        ];

        Ok(RunningNode {
            local_addr,
            state,
            shutdown_tx,
            server_task,
            loops,
            watcher,
        })
    }
}

/// Handle to a started node
pub struct RunningNode {
    local_addr: SocketAddr,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<()>,
    loops: Vec<JoinHandle<()>>,
    watcher: WatcherHandle,
}

impl RunningNode {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared state, as seen by the HTTP handlers
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.state.coordinator
    }

    /// Stop the loops and the watcher and drain the server
    pub async fn shutdown(self) {
        info!("Shutting down");
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.server_task.await {
            error!("Server task failed: {}", e);
        }
        for task in self.loops {
            if let Err(e) = task.await {
                error!("Background task failed: {}", e);
            }
        }
        self.watcher.join().await;
    }
}

/// Create the watched root and return its canonical form
fn prepare_root(root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root).map_err(|e| ConfigError::WatchRoot {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;
    let canonical = root.canonicalize().map_err(|e| ConfigError::WatchRoot {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(canonical)
}

/// Journal path with a canonical parent, so watcher paths compare equal
fn absolute_journal_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Journal path {} has no file name", path.display()))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;
    let parent = parent
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", parent.display()))?;
    Ok(parent.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn journal_path_is_made_absolute() {
        let dir = tempdir().expect("tempdir");
        let path = absolute_journal_path(&dir.path().join("nested").join("log.jsonl"))
            .expect("journal path");
        assert!(path.is_absolute());
        assert!(path.ends_with("nested/log.jsonl"));
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn unusable_root_is_a_config_error() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("occupied");
        std::fs::write(&file, "x").unwrap();

        let err = prepare_root(&file.join("root")).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[tokio::test]
    async fn offline_node_starts_and_stops() {
        let dir = tempdir().expect("tempdir");
        let config = NodeConfig::default()
            .with_node_id("solo")
            .with_watch_root(dir.path().join("root"))
            .with_journal_path(dir.path().join("change_log.jsonl"))
            .with_host("127.0.0.1")
            .with_port(0);

        let node = Node::start(config).await.expect("start");
        assert_ne!(node.local_addr().port(), 0);
        assert!(!node.coordinator().peers().is_connected());
        node.shutdown().await;
    }
}
