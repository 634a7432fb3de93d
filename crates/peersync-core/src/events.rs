//! Fire-and-forget notifications for live observers such as a UI.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::ChangeRecord;

const EVENT_CAPACITY: usize = 256;

/// Something an attached observer may want to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A local filesystem change was captured.
    ChangeDetected { change: ChangeRecord },
    /// A change from a peer was applied locally.
    ChangeApplied { change: ChangeRecord },
    /// Peer reachability flipped.
    Connectivity {
        connected: bool,
        peer: Option<String>,
    },
}

impl NodeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NodeEvent::ChangeDetected { .. } => "change_detected",
            NodeEvent::ChangeApplied { .. } => "change_applied",
            NodeEvent::Connectivity { .. } => "connectivity",
        }
    }
}

/// Broadcast channel for [`NodeEvent`]s. Delivery is best effort.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Change payloads are stripped of file content.
    pub fn emit(&self, event: NodeEvent) {
        let event = match event {
            NodeEvent::ChangeDetected { change } => NodeEvent::ChangeDetected {
                change: change.without_content(),
            },
            NodeEvent::ChangeApplied { change } => NodeEvent::ChangeApplied {
                change: change.without_content(),
            },
            other => other,
        };
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }
}
