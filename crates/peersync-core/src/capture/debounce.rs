use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::ChangeKind;

/// `(type, src, dest)` of a candidate record.
pub type DebounceKey = (ChangeKind, String, Option<String>);

/// Prune the table once it grows past this many keys.
const PRUNE_THRESHOLD: usize = 1024;

/// Drops notifications that repeat a key emitted within the window.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_emitted: HashMap<DebounceKey, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emitted: HashMap::new(),
        }
    }

    /// Whether a notification for `key` seen at `now` should become a record.
    /// Accepting it restarts the window for that key.
    pub fn accept(&mut self, key: DebounceKey, now: Instant) -> bool {
        if self.last_emitted.len() >= PRUNE_THRESHOLD {
            self.prune(now);
        }

        match self.last_emitted.get(&key) {
            Some(last) if now.saturating_duration_since(*last) <= self.window => false,
            _ => {
                self.last_emitted.insert(key, now);
                true
            }
        }
    }

    /// Forget keys whose window has passed.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.last_emitted
            .retain(|_, last| now.saturating_duration_since(*last) <= window);
    }

    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(kind: ChangeKind, src: &str) -> DebounceKey {
        (kind, src.to_string(), None)
    }

    #[test]
    fn repeats_inside_the_window_are_dropped() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let t0 = Instant::now();

        assert!(debouncer.accept(key(ChangeKind::Modified, "a.txt"), t0));
        assert!(!debouncer.accept(
            key(ChangeKind::Modified, "a.txt"),
            t0 + Duration::from_millis(200)
        ));
        assert!(debouncer.accept(
            key(ChangeKind::Modified, "a.txt"),
            t0 + Duration::from_millis(701)
        ));
    }

    #[test]
    fn different_keys_do_not_interfere() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let t0 = Instant::now();

        assert!(debouncer.accept(key(ChangeKind::Created, "a.txt"), t0));
        assert!(debouncer.accept(key(ChangeKind::Modified, "a.txt"), t0));
        assert!(debouncer.accept(key(ChangeKind::Modified, "b.txt"), t0));
        assert!(debouncer.accept(
            (ChangeKind::Moved, "a.txt".to_string(), Some("c.txt".to_string())),
            t0
        ));
        assert!(debouncer.accept(
            (ChangeKind::Moved, "a.txt".to_string(), Some("d.txt".to_string())),
            t0
        ));
    }

    #[test]
    fn prune_drops_expired_keys() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let t0 = Instant::now();
        debouncer.accept(key(ChangeKind::Modified, "a.txt"), t0);
        debouncer.accept(
            key(ChangeKind::Modified, "b.txt"),
            t0 + Duration::from_millis(400),
        );

        debouncer.prune(t0 + Duration::from_millis(600));
        assert_eq!(debouncer.len(), 1);
    }
}
