//! In-memory queue of locally captured changes awaiting a push.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::types::ChangeRecord;

/// Ordered, non-durable queue of changes not yet delivered to a peer.
///
/// A push round takes a [`snapshot`](Self::snapshot), delivers records in
/// order and then [`acknowledge`](Self::acknowledge)s how many made it, so
/// records captured while a push is in flight are kept.
#[derive(Debug, Default)]
pub struct PendingOutbox {
    queue: Mutex<VecDeque<ChangeRecord>>,
}

impl PendingOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: ChangeRecord) {
        self.lock().push_back(record);
    }

    /// Copy of the queued records, oldest first.
    pub fn snapshot(&self) -> Vec<ChangeRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Drop the `delivered` oldest records.
    pub fn acknowledge(&self, delivered: usize) {
        let mut queue = self.lock();
        let n = delivered.min(queue.len());
        queue.drain(..n);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether any queued record touches `path` (as source or destination).
    pub fn touches(&self, path: &str) -> bool {
        self.lock()
            .iter()
            .any(|r| r.src == path || r.dest.as_deref() == Some(path))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ChangeRecord>> {
        // A poisoned queue still holds valid records.
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}
