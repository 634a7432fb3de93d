/// Background replication against the active peer, plus on-demand push and pull
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time;
use tracing::{debug, error, info, warn};

use peersync_core::types::parse_timestamp;
use peersync_core::{
    ApplyEngine, ApplyOutcome, ApplyReport, ChangeJournal, ChangeRecord, NodeConfig,
    PeerDirectory, PendingOutbox,
};

/// Configuration for the sync coordinator
#[derive(Debug, Clone)]
pub struct SyncCoordinatorConfig {
    /// How often to pull from the active peer
    pub poll_interval: Duration,
    /// How often to look for a peer while offline
    pub rediscovery_interval: Duration,
}

impl Default for SyncCoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            rediscovery_interval: Duration::from_secs(30),
        }
    }
}

impl From<&NodeConfig> for SyncCoordinatorConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            rediscovery_interval: config.rediscovery_interval(),
        }
    }
}

/// Failures of the on-demand operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("No reachable peer")]
    NoPeer,

    #[error("Push to {peer} stopped after {delivered} change(s): {source}")]
    Push {
        peer: String,
        delivered: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of a push round
#[derive(Debug, Clone)]
pub struct PushSummary {
    pub peer: String,
    pub pushed: usize,
}

/// Outcome of a full-state pull
#[derive(Debug, Clone)]
pub struct PullSummary {
    pub peer: String,
    pub report: ApplyReport,
}

/// Drives replication for one node
pub struct SyncCoordinator {
    node_id: String,
    journal: Arc<ChangeJournal>,
    outbox: Arc<PendingOutbox>,
    apply: Arc<ApplyEngine>,
    peers: Arc<PeerDirectory>,
    config: SyncCoordinatorConfig,
    checkpoint: Mutex<String>,
    push_lock: Mutex<()>,
}

impl SyncCoordinator {
    /// Create a coordinator whose pull cursor starts at `checkpoint`
    pub fn new(
        journal: Arc<ChangeJournal>,
        outbox: Arc<PendingOutbox>,
        apply: Arc<ApplyEngine>,
        peers: Arc<PeerDirectory>,
        config: SyncCoordinatorConfig,
        checkpoint: String,
    ) -> Self {
        Self {
            node_id: apply.node_id().to_string(),
            journal,
            outbox,
            apply,
            peers,
            config,
            checkpoint: Mutex::new(checkpoint),
            push_lock: Mutex::new(()),
        }
    }

    pub fn peers(&self) -> &Arc<PeerDirectory> {
        &self.peers
    }

    pub async fn checkpoint(&self) -> String {
        self.checkpoint.lock().await.clone()
    }

    /// First-match discovery; a found peer's snapshot is reconciled locally
    pub async fn discover(&self) -> Option<String> {
        let selection = self.peers.select_active_peer().await?;
        let peer = selection.peer.base_url().to_string();
        info!(
            "Reconciling with {} ({} snapshot entries)",
            peer,
            selection.snapshot.len()
        );
        self.apply.apply_full_snapshot(&selection.snapshot).await;
        Some(peer)
    }

    /// Pull and ingest changes from the active peer once.
    ///
    /// Returns how many records were applied. A transport failure leaves the
    /// checkpoint untouched and re-arms discovery.
    pub async fn poll_once(&self) -> Result<usize> {
        let Some(peer) = self.peers.active_peer() else {
            return Ok(0);
        };

        let since = self.checkpoint().await;
        let records = match peer.get_changes(&since).await {
            Ok(records) => records,
            Err(e) => {
                self.peers.mark_unreachable(peer.base_url());
                return Err(e);
            }
        };
        if records.is_empty() {
            return Ok(0);
        }

        debug!("Pulled {} change(s) from {}", records.len(), peer.base_url());
        Ok(self.ingest_pulled(records).await)
    }

    /// Ingest a pulled batch and advance the checkpoint past it.
    ///
    /// Records with a malformed timestamp are dropped; they would otherwise
    /// push the cursor past every well-formed timestamp.
    async fn ingest_pulled(&self, records: Vec<ChangeRecord>) -> usize {
        let (valid, malformed): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|r| parse_timestamp(&r.timestamp).is_some());
        for record in &malformed {
            warn!(
                "Dropping pulled {} with malformed timestamp {:?}",
                record.describe(),
                record.timestamp
            );
        }

        let applied = self.ingest(&valid).await;

        if let Some(latest) = valid.iter().map(|r| r.timestamp.as_str()).max() {
            let mut checkpoint = self.checkpoint.lock().await;
            if latest > checkpoint.as_str() {
                *checkpoint = latest.to_string();
            }
        }
        applied
    }

    /// Apply and journal a pulled batch, skipping records this node created
    async fn ingest(&self, records: &[ChangeRecord]) -> usize {
        let mut applied = 0;
        for record in records {
            if record.origin == self.node_id {
                continue;
            }
            info!("Applying {}", record.describe());
            match self.apply.apply_change(record).await {
                Ok(ApplyOutcome::Applied) => applied += 1,
                Ok(outcome) => debug!("{} -> {:?}", record.describe(), outcome),
                Err(e) => error!("Error applying {}: {}", record.describe(), e),
            }
            if let Err(e) = self.journal.append(record).await {
                error!("Failed to journal {}: {}", record.describe(), e);
            }
        }
        applied
    }

    /// Send every pending local change to the fastest peer, in order.
    ///
    /// Delivered records leave the outbox even when a later one fails.
    pub async fn push_pending(&self) -> std::result::Result<PushSummary, SyncError> {
        let _guard = self.push_lock.lock().await;
        let selection = self
            .peers
            .select_fastest_peer()
            .await
            .ok_or(SyncError::NoPeer)?;
        let peer = selection.peer;
        let peer_url = peer.base_url().to_string();

        let pending = self.outbox.snapshot();
        let mut delivered = 0;
        for record in &pending {
            if let Err(source) = peer.push_change(record).await {
                self.outbox.acknowledge(delivered);
                warn!("Push to {} failed: {:#}", peer_url, source);
                self.peers.mark_unreachable(&peer_url);
                return Err(SyncError::Push {
                    peer: peer_url,
                    delivered,
                    source,
                });
            }
            delivered += 1;
        }
        self.outbox.acknowledge(delivered);

        info!("Pushed {} change(s) to {}", delivered, peer_url);
        Ok(PushSummary {
            peer: peer_url,
            pushed: delivered,
        })
    }

    /// Reconcile with the fastest peer's full state (last writer wins)
    pub async fn pull_full_state(&self) -> std::result::Result<PullSummary, SyncError> {
        let selection = self
            .peers
            .select_fastest_peer()
            .await
            .ok_or(SyncError::NoPeer)?;
        let report = self.apply.apply_full_snapshot(&selection.snapshot).await;
        Ok(PullSummary {
            peer: selection.peer.base_url().to_string(),
            report,
        })
    }

    /// Poll the active peer until shutdown
    pub async fn run_poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting poll loop with interval {:?}",
            self.config.poll_interval
        );

        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        // First pull waits a full interval; startup already reconciled.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("Poll failed: {:#}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Poll loop stopped");
    }

    /// Re-run discovery while no peer is active, until shutdown
    pub async fn run_rediscovery_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.rediscovery_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        // The first tick completes immediately; startup already ran discovery.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.peers.is_connected() {
                        debug!("Offline, probing peers");
                        self.discover().await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Rediscovery loop stopped");
    }
}
