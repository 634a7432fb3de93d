//! Known peers, the active peer and the two selection policies.

mod client;

pub use client::{PeerClient, PushResponse};

use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::future::join_all;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::events::{EventBus, NodeEvent};
use crate::types::SnapshotEntry;

#[derive(Debug, Default)]
struct PeerState {
    active: Option<String>,
    connected: bool,
}

/// A selected peer together with the snapshot it returned when contacted.
#[derive(Debug, Clone)]
pub struct Selection {
    pub peer: PeerClient,
    pub snapshot: Vec<SnapshotEntry>,
    pub latency: Duration,
}

/// Ordered peer list plus the currently active peer.
///
/// Only the selection operations and [`mark_unreachable`](Self::mark_unreachable)
/// change the active peer.
#[derive(Debug)]
pub struct PeerDirectory {
    peers: Vec<PeerClient>,
    probe_timeout: Duration,
    state: Mutex<PeerState>,
    events: Option<EventBus>,
}

impl PeerDirectory {
    pub fn new(
        peer_urls: Vec<String>,
        probe_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Self {
        let client = Client::new();
        let peers = peer_urls
            .into_iter()
            .map(|url| PeerClient::with_client(url, client.clone(), transfer_timeout))
            .collect();
        Self {
            peers,
            probe_timeout,
            state: Mutex::new(PeerState::default()),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn peers(&self) -> &[PeerClient] {
        &self.peers
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn active_peer_url(&self) -> Option<String> {
        self.lock().active.clone()
    }

    /// Client for the active peer, if any.
    pub fn active_peer(&self) -> Option<PeerClient> {
        let active = self.lock().active.clone()?;
        self.peers.iter().find(|p| p.base_url() == active).cloned()
    }

    /// First-match policy: contact peers in list order and keep the first that
    /// answers with its full state.
    pub async fn select_active_peer(&self) -> Option<Selection> {
        for peer in &self.peers {
            let started = Instant::now();
            match peer.get_full_state(self.probe_timeout).await {
                Ok(snapshot) => {
                    self.set_active(Some(peer.base_url().to_string()));
                    return Some(Selection {
                        peer: peer.clone(),
                        snapshot,
                        latency: started.elapsed(),
                    });
                }
                Err(e) => debug!("Peer {} did not answer: {:#}", peer.base_url(), e),
            }
        }
        self.set_active(None);
        None
    }

    /// Fastest-peer policy: contact every peer at once and keep the quickest.
    pub async fn select_fastest_peer(&self) -> Option<Selection> {
        let probes = self.peers.iter().map(|peer| async move {
            let started = Instant::now();
            let result = peer.get_full_state(self.probe_timeout).await;
            (peer, result, started.elapsed())
        });

        let fastest = join_all(probes)
            .await
            .into_iter()
            .filter_map(|(peer, result, latency)| match result {
                Ok(snapshot) => Some(Selection {
                    peer: peer.clone(),
                    snapshot,
                    latency,
                }),
                Err(e) => {
                    debug!("Peer {} did not answer: {:#}", peer.base_url(), e);
                    None
                }
            })
            .min_by_key(|selection| selection.latency);

        match &fastest {
            Some(selection) => {
                debug!(
                    "Fastest peer {} answered in {:?}",
                    selection.peer.base_url(),
                    selection.latency
                );
                self.set_active(Some(selection.peer.base_url().to_string()));
            }
            None => self.set_active(None),
        }
        fastest
    }

    /// Forget `peer` as the active peer so discovery runs again.
    pub fn mark_unreachable(&self, peer: &str) {
        let is_active = self.lock().active.as_deref() == Some(peer);
        if is_active {
            self.set_active(None);
        }
    }

    fn set_active(&self, peer: Option<String>) {
        let connected = peer.is_some();
        let flipped = {
            let mut state = self.lock();
            let flipped = state.connected != connected;
            state.active = peer.clone();
            state.connected = connected;
            flipped
        };
        if !flipped {
            return;
        }

        match &peer {
            Some(url) => info!("Connected to peer {}", url),
            None => warn!("No peer reachable, working offline"),
        }
        if let Some(events) = &self.events {
            events.emit(NodeEvent::Connectivity { connected, peer });
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_peers_means_offline() {
        let directory = PeerDirectory::new(
            Vec::new(),
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        assert!(directory.select_active_peer().await.is_none());
        assert!(directory.select_fastest_peer().await.is_none());
        assert!(!directory.is_connected());
        assert!(directory.active_peer().is_none());
    }

    #[tokio::test]
    async fn unreachable_peers_leave_the_node_offline() {
        // Nothing listens on port 9 of the loopback interface.
        let directory = PeerDirectory::new(
            vec!["http://127.0.0.1:9".to_string()],
            Duration::from_millis(300),
            Duration::from_secs(1),
        );
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let directory = directory.with_events(events);

        assert!(directory.select_active_peer().await.is_none());
        assert!(!directory.is_connected());
        // Already offline, so no flip is reported.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn connectivity_flips_are_published_once() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let directory = PeerDirectory::new(
            vec!["http://a:5000".to_string(), "http://b:5000".to_string()],
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
        .with_events(events);

        directory.set_active(Some("http://a:5000".to_string()));
        directory.set_active(Some("http://b:5000".to_string()));
        assert_eq!(directory.active_peer_url().as_deref(), Some("http://b:5000"));

        directory.mark_unreachable("http://a:5000");
        assert!(directory.is_connected());
        directory.mark_unreachable("http://b:5000");
        assert!(!directory.is_connected());

        assert!(matches!(
            rx.try_recv(),
            Ok(NodeEvent::Connectivity { connected: true, .. })
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(NodeEvent::Connectivity { connected: false, peer: None })
        ));
        assert!(rx.try_recv().is_err());
    }
}
