//! Turns raw `notify` events into created / modified / deleted / moved.
//!
//! Backends report renames as separate `From` / `To` halves (plus a `Both`
//! on inotify) and report a recursive delete child-first, one path at a
//! time. The normalizer pairs the halves, holds removals for a short settle
//! window and collapses removals under a removed directory into that
//! directory.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};
use tracing::trace;
use walkdir::WalkDir;

use crate::types::ChangeKind;

/// Default time removals and rename halves wait for their companions.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(250);

/// A normalized change with absolute paths, before debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub dest: Option<PathBuf>,
    pub is_directory: bool,
}

impl RawChange {
    fn new(kind: ChangeKind, path: PathBuf, is_directory: bool) -> Self {
        Self {
            kind,
            path,
            dest: None,
            is_directory,
        }
    }

    fn moved(path: PathBuf, dest: PathBuf, is_directory: bool) -> Self {
        Self {
            kind: ChangeKind::Moved,
            path,
            dest: Some(dest),
            is_directory,
        }
    }
}

#[derive(Debug, Clone)]
struct Pending {
    path: PathBuf,
    is_directory: bool,
    seen: Instant,
}

#[derive(Debug)]
pub struct EventNormalizer {
    settle: Duration,
    known_dirs: HashSet<PathBuf>,
    removals: Vec<Pending>,
    /// Rename sources waiting for their `To`, by tracker.
    rename_sources: HashMap<usize, Pending>,
    /// Untracked rename sources; they can only expire into deletions.
    orphan_sources: Vec<Pending>,
    /// Trackers already emitted from a `To`, so the trailing `Both` is dropped.
    paired: HashMap<usize, Instant>,
}

impl EventNormalizer {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            known_dirs: HashSet::new(),
            removals: Vec::new(),
            rename_sources: HashMap::new(),
            orphan_sources: Vec::new(),
            paired: HashMap::new(),
        }
    }

    /// Normalizer that already knows every directory under `root`.
    pub fn seeded(root: &Path, settle: Duration) -> Self {
        let mut normalizer = Self::new(settle);
        normalizer.known_dirs.extend(
            WalkDir::new(root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_dir())
                .map(|e| e.into_path()),
        );
        normalizer
    }

    pub fn is_known_dir(&self, path: &Path) -> bool {
        self.known_dirs.contains(path)
    }

    /// Feed one notification; returns the changes it completes.
    pub fn handle(&mut self, event: Event, now: Instant) -> Vec<RawChange> {
        let mut out = Vec::new();
        let tracker = event.attrs.tracker();

        match event.kind {
            EventKind::Remove(kind) => {
                for path in event.paths {
                    let is_directory =
                        matches!(kind, RemoveKind::Folder) || self.known_dirs.contains(&path);
                    self.removals.push(Pending {
                        path,
                        is_directory,
                        seen: now,
                    });
                }
            }
            EventKind::Create(kind) => {
                self.flush_removals(&mut out);
                for path in event.paths {
                    let is_directory = match kind {
                        CreateKind::Folder => true,
                        CreateKind::File => false,
                        _ => path.is_dir(),
                    };
                    if is_directory {
                        self.known_dirs.insert(path.clone());
                    }
                    out.push(RawChange::new(ChangeKind::Created, path, is_directory));
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                self.flush_removals(&mut out);
                self.handle_rename(mode, tracker, event.paths, now, &mut out);
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => {}
            EventKind::Modify(_) => {
                self.flush_removals(&mut out);
                for path in event.paths {
                    let is_directory = self.known_dirs.contains(&path) || path.is_dir();
                    out.push(RawChange::new(ChangeKind::Modified, path, is_directory));
                }
            }
            other => trace!("Ignoring notification {:?}", other),
        }

        out
    }

    /// Release removals and rename sources whose settle window has passed.
    pub fn tick(&mut self, now: Instant) -> Vec<RawChange> {
        let mut out = Vec::new();

        let quiet = self
            .removals
            .iter()
            .map(|p| p.seen)
            .max()
            .is_some_and(|last| now.saturating_duration_since(last) >= self.settle);
        if quiet {
            self.flush_removals(&mut out);
        }

        let settle = self.settle;
        let expired = |p: &Pending| now.saturating_duration_since(p.seen) >= settle;
        let mut gone: Vec<Pending> = Vec::new();
        let trackers: Vec<usize> = self
            .rename_sources
            .iter()
            .filter(|(_, p)| expired(p))
            .map(|(t, _)| *t)
            .collect();
        for tracker in trackers {
            if let Some(pending) = self.rename_sources.remove(&tracker) {
                gone.push(pending);
            }
        }
        let (old, young): (Vec<_>, Vec<_>) =
            self.orphan_sources.drain(..).partition(|p| expired(p));
        self.orphan_sources = young;
        gone.extend(old);

        if !gone.is_empty() {
            // Moved out of the tree.
            self.flush_removals(&mut out);
            self.removals = gone;
            self.flush_removals(&mut out);
        }

        self.paired
            .retain(|_, seen| now.saturating_duration_since(*seen) < settle);
        out
    }

    /// Release everything still held, regardless of age.
    pub fn drain(&mut self) -> Vec<RawChange> {
        let mut out = Vec::new();
        self.flush_removals(&mut out);
        self.removals = self
            .rename_sources
            .drain()
            .map(|(_, p)| p)
            .chain(self.orphan_sources.drain(..))
            .collect();
        self.flush_removals(&mut out);
        self.paired.clear();
        out
    }

    fn handle_rename(
        &mut self,
        mode: RenameMode,
        tracker: Option<usize>,
        paths: Vec<PathBuf>,
        now: Instant,
        out: &mut Vec<RawChange>,
    ) {
        match mode {
            RenameMode::Both => {
                if tracker.is_some_and(|t| self.paired.remove(&t).is_some()) {
                    return;
                }
                if let Some(t) = tracker {
                    self.rename_sources.remove(&t);
                }
                let mut paths = paths.into_iter();
                if let (Some(from), Some(to)) = (paths.next(), paths.next()) {
                    let is_directory = self.known_dirs.contains(&from) || to.is_dir();
                    out.push(self.record_move(from, to, is_directory));
                }
            }
            RenameMode::From => {
                for path in paths {
                    let pending = Pending {
                        is_directory: self.known_dirs.contains(&path),
                        path,
                        seen: now,
                    };
                    match tracker {
                        Some(t) => {
                            self.rename_sources.insert(t, pending);
                        }
                        None => self.orphan_sources.push(pending),
                    }
                }
            }
            RenameMode::To => {
                let source = tracker.and_then(|t| self.rename_sources.remove(&t));
                for path in paths {
                    match &source {
                        Some(from) => {
                            if let Some(t) = tracker {
                                self.paired.insert(t, now);
                            }
                            let is_directory = from.is_directory || path.is_dir();
                            out.push(self.record_move(from.path.clone(), path, is_directory));
                        }
                        None => {
                            // Moved in from outside the tree.
                            let is_directory = path.is_dir();
                            if is_directory {
                                self.known_dirs.insert(path.clone());
                            }
                            out.push(RawChange::new(ChangeKind::Created, path, is_directory));
                        }
                    }
                }
            }
            RenameMode::Any | RenameMode::Other => {
                // Backends that cannot pair halves: judge by what is on disk now.
                for path in paths {
                    if path.exists() {
                        let is_directory = path.is_dir();
                        if is_directory {
                            self.known_dirs.insert(path.clone());
                        }
                        out.push(RawChange::new(ChangeKind::Created, path, is_directory));
                    } else {
                        let is_directory = self.known_dirs.contains(&path);
                        self.removals.push(Pending {
                            path,
                            is_directory,
                            seen: now,
                        });
                    }
                }
            }
        }
    }

    fn record_move(&mut self, from: PathBuf, to: PathBuf, is_directory: bool) -> RawChange {
        if is_directory {
            let moved: Vec<PathBuf> = self
                .known_dirs
                .iter()
                .filter(|d| d.starts_with(&from))
                .cloned()
                .collect();
            for dir in moved {
                self.known_dirs.remove(&dir);
                if let Ok(rest) = dir.strip_prefix(&from) {
                    self.known_dirs.insert(to.join(rest));
                }
            }
            self.known_dirs.insert(to.clone());
        }
        RawChange::moved(from, to, is_directory)
    }

    fn flush_removals(&mut self, out: &mut Vec<RawChange>) {
        if self.removals.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.removals);
        let removed: HashSet<&Path> = pending.iter().map(|p| p.path.as_path()).collect();
        let mut emitted: HashSet<PathBuf> = HashSet::new();
        let mut changes = Vec::new();

        for p in &pending {
            let covered = p
                .path
                .ancestors()
                .skip(1)
                .any(|ancestor| removed.contains(ancestor));
            if covered || !emitted.insert(p.path.clone()) {
                continue;
            }
            changes.push(RawChange::new(
                ChangeKind::Deleted,
                p.path.clone(),
                p.is_directory,
            ));
        }

        for change in &changes {
            if change.is_directory {
                self.known_dirs.retain(|d| !d.starts_with(&change.path));
            }
        }
        out.extend(changes);
    }
}
