//! Paths the node is writing itself, hidden from change capture for a while.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_HOLD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
struct Hold {
    until: Instant,
    recursive: bool,
}

/// Short-lived set of paths whose notifications must not become changes.
///
/// The apply engine registers every path it is about to touch (and again once
/// done), so the watcher does not re-capture replicated writes as local edits.
/// A recursive hold also covers everything below the path.
#[derive(Debug)]
pub struct IgnoredPaths {
    hold: Duration,
    paths: Mutex<HashMap<PathBuf, Hold>>,
}

impl Default for IgnoredPaths {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD)
    }
}

impl IgnoredPaths {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            paths: Mutex::new(HashMap::new()),
        }
    }

    pub fn ignore(&self, path: &Path) {
        self.insert(path, false, Instant::now());
    }

    pub fn ignore_recursive(&self, path: &Path) {
        self.insert(path, true, Instant::now());
    }

    /// Whether a notification for `path` observed at `now` should be dropped.
    pub fn is_ignored(&self, path: &Path, now: Instant) -> bool {
        let mut paths = self.lock();
        paths.retain(|_, hold| hold.until > now);

        if paths.contains_key(path) {
            return true;
        }
        path.ancestors()
            .skip(1)
            .any(|ancestor| paths.get(ancestor).is_some_and(|hold| hold.recursive))
    }

    fn insert(&self, path: &Path, recursive: bool, now: Instant) {
        let until = now + self.hold;
        let mut paths = self.lock();
        let entry = paths.entry(path.to_path_buf()).or_insert(Hold { until, recursive });
        entry.until = entry.until.max(until);
        entry.recursive |= recursive;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Hold>> {
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_paths_expire() {
        let ignored = IgnoredPaths::new(Duration::from_millis(100));
        let path = Path::new("/root/a.txt");
        let start = Instant::now();
        ignored.insert(path, false, start);

        assert!(ignored.is_ignored(path, start + Duration::from_millis(50)));
        assert!(!ignored.is_ignored(path, start + Duration::from_millis(150)));
    }

    #[test]
    fn recursive_holds_cover_descendants_only_when_recursive() {
        let ignored = IgnoredPaths::new(Duration::from_secs(5));
        let now = Instant::now();
        ignored.insert(Path::new("/root/gone"), true, now);
        ignored.insert(Path::new("/root/fresh"), false, now);

        assert!(ignored.is_ignored(Path::new("/root/gone/deep/file"), now));
        assert!(!ignored.is_ignored(Path::new("/root/fresh/new-file"), now));
        assert!(ignored.is_ignored(Path::new("/root/fresh"), now));
        assert!(!ignored.is_ignored(Path::new("/root/other"), now));
    }
}
