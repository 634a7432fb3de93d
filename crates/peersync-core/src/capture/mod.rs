//! Change capture: filesystem notifications in, journaled change records out.

mod debounce;
mod normalize;
mod watcher;

pub use debounce::{DebounceKey, Debouncer};
pub use normalize::{EventNormalizer, RawChange, DEFAULT_SETTLE};
pub use watcher::{spawn_watcher, WatcherHandle};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::JournalError;
use crate::events::{EventBus, NodeEvent};
use crate::ignore::IgnoredPaths;
use crate::journal::ChangeJournal;
use crate::outbox::PendingOutbox;
use crate::types::{encode_content, now_timestamp, relative_to, ChangeKind, ChangeRecord};

/// Builds change records from normalized notifications and hands them to the
/// journal, the outbox and the event bus.
pub struct ChangeCapture {
    root: PathBuf,
    node_id: String,
    journal: Arc<ChangeJournal>,
    outbox: Arc<PendingOutbox>,
    excluded: Vec<PathBuf>,
    ignored: Option<Arc<IgnoredPaths>>,
    events: Option<EventBus>,
    debouncer: Mutex<Debouncer>,
}

impl ChangeCapture {
    pub fn new(
        root: impl Into<PathBuf>,
        node_id: impl Into<String>,
        journal: Arc<ChangeJournal>,
        outbox: Arc<PendingOutbox>,
        debounce_window: Duration,
    ) -> Self {
        let excluded = vec![journal.path().to_path_buf()];
        Self {
            root: root.into(),
            node_id: node_id.into(),
            journal,
            outbox,
            excluded,
            ignored: None,
            events: None,
            debouncer: Mutex::new(Debouncer::new(debounce_window)),
        }
    }

    /// Skip notifications for paths the node itself is writing.
    pub fn with_ignored_paths(mut self, ignored: Arc<IgnoredPaths>) -> Self {
        self.ignored = Some(ignored);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Turn one normalized notification into at most one journaled record.
    ///
    /// Returns `None` when the notification is filtered, debounced, or
    /// already journaled.
    pub async fn record(&self, raw: RawChange) -> Result<Option<ChangeRecord>, JournalError> {
        let now = Instant::now();
        if self.is_excluded(&raw.path) || raw.dest.as_deref().is_some_and(|d| self.is_excluded(d)) {
            return Ok(None);
        }
        if self.is_self_write(&raw, now) {
            debug!("Ignoring self-inflicted {:?} on {}", raw.kind, raw.path.display());
            return Ok(None);
        }
        if raw.kind == ChangeKind::Modified && raw.is_directory {
            return Ok(None);
        }

        let Some(src) = relative_to(&self.root, &raw.path) else {
            return Ok(None);
        };
        let dest = match (&raw.kind, &raw.dest) {
            (ChangeKind::Moved, Some(dest)) => match relative_to(&self.root, dest) {
                Some(dest) => Some(dest),
                None => return Ok(None),
            },
            _ => None,
        };

        let accepted = self
            .debouncer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accept((raw.kind, src.clone(), dest.clone()), now);
        if !accepted {
            return Ok(None);
        }

        let content = if raw.kind.carries_content() && !raw.is_directory {
            match tokio::fs::read(&raw.path).await {
                Ok(bytes) => Some(encode_content(&bytes)),
                Err(e) => {
                    debug!("Could not read {} for capture: {}", raw.path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        let record = ChangeRecord {
            timestamp: now_timestamp(),
            kind: raw.kind,
            src,
            is_directory: raw.is_directory,
            dest,
            origin: self.node_id.clone(),
            content,
        };

        if !self.journal.append(&record).await? {
            return Ok(None);
        }
        self.outbox.push(record.clone());
        info!("{} | {}", record.timestamp, record.describe());
        if let Some(events) = &self.events {
            events.emit(NodeEvent::ChangeDetected {
                change: record.clone(),
            });
        }
        Ok(Some(record))
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|p| p == path)
    }

    fn is_self_write(&self, raw: &RawChange, now: Instant) -> bool {
        let Some(ignored) = &self.ignored else {
            return false;
        };
        ignored.is_ignored(&raw.path, now)
            || raw.dest.as_deref().is_some_and(|d| ignored.is_ignored(d, now))
    }
}
