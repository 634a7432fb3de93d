//! Applies remote changes and snapshots to the local tree.
//!
//! Everything here is idempotent: replaying a change or a snapshot converges
//! to the same state, and ordinary races (missing parents, targets already
//! gone) are not errors.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, error, info, warn};

use crate::error::ApplyError;
use crate::events::{EventBus, NodeEvent};
use crate::ignore::IgnoredPaths;
use crate::types::{resolve_under, ChangeKind, ChangeRecord, SnapshotEntry};

/// Modification times closer than this are considered equal.
pub const MTIME_EPSILON_SECS: f64 = 0.01;

/// What happened to a single change or snapshot entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The change originated on this node.
    EchoSuppressed,
    /// A move whose source no longer exists.
    SourceMissing,
    /// Nothing to do (already in the requested state, local copy newer, ...).
    Skipped,
}

/// Tally of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ApplyReport {
    fn record(&mut self, result: &Result<ApplyOutcome, ApplyError>) {
        match result {
            Ok(ApplyOutcome::Applied) => self.applied += 1,
            Ok(_) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Mutates the watched tree to match remote changes.
#[derive(Debug, Clone)]
pub struct ApplyEngine {
    root: PathBuf,
    node_id: String,
    protected: Vec<PathBuf>,
    ignored: Option<Arc<IgnoredPaths>>,
    events: Option<EventBus>,
}

impl ApplyEngine {
    pub fn new(root: impl Into<PathBuf>, node_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            node_id: node_id.into(),
            protected: Vec::new(),
            ignored: None,
            events: None,
        }
    }

    /// Never touch `path` (the journal file, typically).
    pub fn with_protected_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.protected.push(path.into());
        self
    }

    /// Register touched paths so the watcher does not re-capture them.
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

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Apply one change record.
    pub async fn apply_change(&self, record: &ChangeRecord) -> Result<ApplyOutcome, ApplyError> {
        if record.origin == self.node_id {
            return Ok(ApplyOutcome::EchoSuppressed);
        }

        let path = resolve_under(&self.root, &record.src)?;
        if self.is_protected(&path) {
            debug!("Refusing to apply {} to a protected path", record.describe());
            return Ok(ApplyOutcome::Skipped);
        }

        let outcome = match record.kind {
            ChangeKind::Created if record.is_directory => {
                self.make_dirs(&path).await?;
                ApplyOutcome::Applied
            }
            ChangeKind::Created => match record.decoded_content()? {
                Some(bytes) => {
                    self.write_file(&path, &bytes).await?;
                    ApplyOutcome::Applied
                }
                None => self.touch_file(&path).await?,
            },
            ChangeKind::Modified if record.is_directory => ApplyOutcome::Skipped,
            ChangeKind::Modified => match record.decoded_content()? {
                Some(bytes) => {
                    self.write_file(&path, &bytes).await?;
                    ApplyOutcome::Applied
                }
                None => ApplyOutcome::Skipped,
            },
            ChangeKind::Deleted => self.remove(&path).await?,
            ChangeKind::Moved => {
                let dest_rel = record.dest.as_deref().ok_or_else(|| {
                    ApplyError::InvalidPath(format!("moved record for {} has no dest", record.src))
                })?;
                let dest = resolve_under(&self.root, dest_rel)?;
                if self.is_protected(&dest) {
                    ApplyOutcome::Skipped
                } else {
                    self.rename(&path, &dest).await?
                }
            }
        };

        if outcome == ApplyOutcome::Applied {
            if let Some(events) = &self.events {
                events.emit(NodeEvent::ChangeApplied {
                    change: record.clone(),
                });
            }
        }
        Ok(outcome)
    }

    /// Apply records in order. A failing record is logged and skipped.
    pub async fn apply_batch(&self, records: &[ChangeRecord]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for record in records {
            if record.origin != self.node_id {
                info!("Applying {}", record.describe());
            }
            let result = self.apply_change(record).await;
            if let Err(e) = &result {
                error!("Error applying {}: {}", record.describe(), e);
            }
            report.record(&result);
        }
        report
    }

    /// Reconcile the tree with a peer's snapshot, last writer wins.
    pub async fn apply_full_snapshot(&self, entries: &[SnapshotEntry]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for entry in entries {
            let result = self.apply_snapshot_entry(entry).await;
            if let Err(e) = &result {
                error!("Error reconciling {}: {}", entry.path, e);
            }
            report.record(&result);
        }
        info!(
            "Snapshot reconciled: {} applied, {} unchanged, {} failed",
            report.applied, report.skipped, report.failed
        );
        report
    }

    /// Apply one snapshot entry with the bootstrap policy.
    pub async fn apply_snapshot_entry(
        &self,
        entry: &SnapshotEntry,
    ) -> Result<ApplyOutcome, ApplyError> {
        let path = resolve_under(&self.root, &entry.path)?;
        if self.is_protected(&path) {
            return Ok(ApplyOutcome::Skipped);
        }

        let local = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(ApplyError::io(&path, e)),
        };

        if entry.is_directory {
            return match local {
                Some(meta) if meta.is_dir() => Ok(ApplyOutcome::Skipped),
                Some(_) => {
                    warn!(
                        "Snapshot has a directory at {} but a file exists locally, keeping local",
                        entry.path
                    );
                    Ok(ApplyOutcome::Skipped)
                }
                None => {
                    self.make_dirs(&path).await?;
                    Ok(ApplyOutcome::Applied)
                }
            };
        }

        let remote_mtime = entry
            .last_modified
            .map(|secs| {
                secs_to_system_time(secs)
                    .ok_or_else(|| ApplyError::InvalidMtime(entry.path.clone(), secs))
            })
            .transpose()?;

        let content = entry
            .content
            .as_deref()
            .map(|c| {
                BASE64
                    .decode(c)
                    .map_err(|e| ApplyError::Encoding(entry.path.clone(), e.to_string()))
            })
            .transpose()?
            .unwrap_or_default();

        let Some(meta) = local else {
            info!("Creating missing file from snapshot: {}", entry.path);
            self.write_file(&path, &content).await?;
            if let Some(when) = remote_mtime {
                set_mtime(&path, when).await?;
            }
            return Ok(ApplyOutcome::Applied);
        };

        if meta.is_dir() {
            warn!(
                "Snapshot has a file at {} but a directory exists locally, keeping local",
                entry.path
            );
            return Ok(ApplyOutcome::Skipped);
        }

        let (Some(remote_secs), Some(when)) = (entry.last_modified, remote_mtime) else {
            debug!("Snapshot entry {} has no modification time, keeping local", entry.path);
            return Ok(ApplyOutcome::Skipped);
        };
        let local_secs = meta
            .modified()
            .map(system_time_to_secs)
            .map_err(|e| ApplyError::io(&path, e))?;

        if (local_secs - remote_secs).abs() < MTIME_EPSILON_SECS {
            return Ok(ApplyOutcome::Skipped);
        }
        if remote_secs > local_secs {
            info!("Remote file newer, replacing {}", entry.path);
            self.write_file(&path, &content).await?;
            set_mtime(&path, when).await?;
            Ok(ApplyOutcome::Applied)
        } else {
            debug!("Local file newer, keeping {}", entry.path);
            Ok(ApplyOutcome::Skipped)
        }
    }

    async fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), ApplyError> {
        if let Some(parent) = path.parent() {
            self.make_dirs(parent).await?;
        }
        self.ignore(path, false);
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| ApplyError::io(path, e))?;
        self.ignore(path, false);
        Ok(())
    }

    async fn touch_file(&self, path: &Path) -> Result<ApplyOutcome, ApplyError> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| ApplyError::io(path, e))?
        {
            return Ok(ApplyOutcome::Skipped);
        }
        self.write_file(path, &[]).await?;
        Ok(ApplyOutcome::Applied)
    }

    async fn remove(&self, path: &Path) -> Result<ApplyOutcome, ApplyError> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ApplyOutcome::Skipped),
            Err(e) => return Err(ApplyError::io(path, e)),
        };

        self.ignore(path, meta.is_dir());
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        match result {
            Ok(()) => Ok(ApplyOutcome::Applied),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ApplyOutcome::Skipped),
            Err(e) => Err(ApplyError::io(path, e)),
        }
    }

    /// Move `src` onto `dest`, replacing whatever is at `dest`.
    async fn rename(&self, src: &Path, dest: &Path) -> Result<ApplyOutcome, ApplyError> {
        let src_meta = match tokio::fs::symlink_metadata(src).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ApplyOutcome::SourceMissing),
            Err(e) => return Err(ApplyError::io(src, e)),
        };
        if src == dest {
            return Ok(ApplyOutcome::Skipped);
        }

        if let Some(parent) = dest.parent() {
            self.make_dirs(parent).await?;
        }
        self.ignore(src, src_meta.is_dir());
        self.ignore(dest, src_meta.is_dir());

        match tokio::fs::symlink_metadata(dest).await {
            Ok(meta) if meta.is_dir() => {
                self.ignore(dest, true);
                tokio::fs::remove_dir_all(dest)
                    .await
                    .map_err(|e| ApplyError::io(dest, e))?;
            }
            Ok(_) if src_meta.is_dir() => {
                tokio::fs::remove_file(dest)
                    .await
                    .map_err(|e| ApplyError::io(dest, e))?;
            }
            _ => {}
        }

        tokio::fs::rename(src, dest)
            .await
            .map_err(|e| ApplyError::io(src, e))?;
        self.ignore(dest, src_meta.is_dir());
        Ok(ApplyOutcome::Applied)
    }

    /// Create `path` and its missing ancestors, hiding each new one from capture.
    async fn make_dirs(&self, path: &Path) -> Result<(), ApplyError> {
        for ancestor in path.ancestors() {
            if ancestor == self.root || !ancestor.starts_with(&self.root) {
                break;
            }
            if tokio::fs::try_exists(ancestor).await.unwrap_or(false) {
                break;
            }
            self.ignore(ancestor, false);
        }
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| ApplyError::io(path, e))
    }

    fn ignore(&self, path: &Path, recursive: bool) {
        if let Some(ignored) = &self.ignored {
            if recursive {
                ignored.ignore_recursive(path);
            } else {
                ignored.ignore(path);
            }
        }
    }

    fn is_protected(&self, path: &Path) -> bool {
        self.protected.iter().any(|p| p == path)
    }
}

/// Seconds since the Unix epoch; times before the epoch clamp to zero.
pub fn system_time_to_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Inverse of [`system_time_to_secs`]; `None` for negative, non-finite or
/// unrepresentable values.
pub fn secs_to_system_time(secs: f64) -> Option<SystemTime> {
    if secs < 0.0 {
        return None;
    }
    let offset = Duration::try_from_secs_f64(secs).ok()?;
    UNIX_EPOCH.checked_add(offset)
}

async fn set_mtime(path: &Path, when: SystemTime) -> Result<(), ApplyError> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&target)
            .and_then(|file| file.set_modified(when))
    })
    .await
    .map_err(|e| ApplyError::io(path, std::io::Error::other(e)))?
    .map_err(|e| ApplyError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encode_content;
    use std::fs;
    use tempfile::tempdir;

    const LOCAL: &str = "node-b";
    const REMOTE: &str = "node-a";

    fn change(kind: ChangeKind, src: &str, is_directory: bool) -> ChangeRecord {
        ChangeRecord {
            timestamp: "2024-01-01T00:00:00.000000Z".to_string(),
            kind,
            src: src.to_string(),
            is_directory,
            dest: None,
            origin: REMOTE.to_string(),
            content: None,
        }
    }

    fn file_change(kind: ChangeKind, src: &str, body: &[u8]) -> ChangeRecord {
        ChangeRecord {
            content: Some(encode_content(body)),
            ..change(kind, src, false)
        }
    }

    fn moved(src: &str, dest: &str) -> ChangeRecord {
        ChangeRecord {
            dest: Some(dest.to_string()),
            ..change(ChangeKind::Moved, src, false)
        }
    }

    async fn stamp(path: &Path, secs: f64) {
        let when = secs_to_system_time(secs).expect("valid mtime");
        set_mtime(path, when).await.expect("set mtime");
    }

    fn mtime_secs(path: &Path) -> f64 {
        system_time_to_secs(fs::metadata(path).unwrap().modified().unwrap())
    }

    #[tokio::test]
    async fn created_file_is_written_with_parents_and_replay_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let engine = ApplyEngine::new(dir.path(), LOCAL);
        let record = file_change(ChangeKind::Created, "nested/deeper/foo.txt", b"hi");

        assert_eq!(engine.apply_change(&record).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(engine.apply_change(&record).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(
            fs::read_to_string(dir.path().join("nested/deeper/foo.txt")).unwrap(),
            "hi"
        );
    }

    #[tokio::test]
    async fn echo_of_own_change_is_never_applied() {
        let dir = tempdir().expect("tempdir");
        let engine = ApplyEngine::new(dir.path(), LOCAL);
        fs::write(dir.path().join("keep.txt"), "local").unwrap();

        let mut record = change(ChangeKind::Deleted, "keep.txt", false);
        record.origin = LOCAL.to_string();
        assert_eq!(
            engine.apply_change(&record).await.unwrap(),
            ApplyOutcome::EchoSuppressed
        );

        let mut create = file_change(ChangeKind::Created, "new.txt", b"x");
        create.origin = LOCAL.to_string();
        engine.apply_change(&create).await.unwrap();

        assert!(dir.path().join("keep.txt").exists());
        assert!(!dir.path().join("new.txt").exists());
    }

    #[tokio::test]
    async fn directory_delete_removes_descendants_and_tolerates_replay() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("docs/inner")).unwrap();
        fs::write(dir.path().join("docs/a.txt"), "a").unwrap();
        fs::write(dir.path().join("docs/inner/b.txt"), "b").unwrap();
        let engine = ApplyEngine::new(dir.path(), LOCAL);

        let record = change(ChangeKind::Deleted, "docs", true);
        assert_eq!(engine.apply_change(&record).await.unwrap(), ApplyOutcome::Applied);
        assert!(!dir.path().join("docs").exists());
        assert_eq!(engine.apply_change(&record).await.unwrap(), ApplyOutcome::Skipped);
    }

    #[tokio::test]
    async fn created_directory_and_modified_directory() {
        let dir = tempdir().expect("tempdir");
        let engine = ApplyEngine::new(dir.path(), LOCAL);

        let create = change(ChangeKind::Created, "x/y", true);
        engine.apply_change(&create).await.unwrap();
        engine.apply_change(&create).await.unwrap();
        assert!(dir.path().join("x/y").is_dir());

        let modify = change(ChangeKind::Modified, "x/y", true);
        assert_eq!(engine.apply_change(&modify).await.unwrap(), ApplyOutcome::Skipped);
    }

    #[tokio::test]
    async fn modified_overwrites_and_contentless_records_do_not_truncate() {
        let dir = tempdir().expect("tempdir");
        let engine = ApplyEngine::new(dir.path(), LOCAL);
        fs::write(dir.path().join("f.txt"), "old").unwrap();

        engine
            .apply_change(&file_change(ChangeKind::Modified, "f.txt", b"new"))
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("f.txt")).unwrap(), "new");

        let blind_modify = change(ChangeKind::Modified, "f.txt", false);
        assert_eq!(
            engine.apply_change(&blind_modify).await.unwrap(),
            ApplyOutcome::Skipped
        );
        let blind_create = change(ChangeKind::Created, "f.txt", false);
        engine.apply_change(&blind_create).await.unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("f.txt")).unwrap(), "new");

        let fresh = change(ChangeKind::Created, "empty.txt", false);
        assert_eq!(engine.apply_change(&fresh).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(fs::read(dir.path().join("empty.txt")).unwrap(), b"");
    }

    #[tokio::test]
    async fn move_is_skipped_when_source_is_gone_and_replaces_destination() {
        let dir = tempdir().expect("tempdir");
        let engine = ApplyEngine::new(dir.path(), LOCAL);
        fs::write(dir.path().join("a.txt"), "from-a").unwrap();
        fs::write(dir.path().join("b.txt"), "stale").unwrap();

        let record = moved("a.txt", "sub/b.txt");
        assert_eq!(engine.apply_change(&record).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(
            fs::read_to_string(dir.path().join("sub/b.txt")).unwrap(),
            "from-a"
        );
        assert_eq!(
            engine.apply_change(&record).await.unwrap(),
            ApplyOutcome::SourceMissing
        );

        let over_existing = moved("b.txt", "sub/b.txt");
        engine.apply_change(&over_existing).await.unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("sub/b.txt")).unwrap(),
            "stale"
        );
        assert!(!dir.path().join("b.txt").exists());
    }

    #[tokio::test]
    async fn batch_continues_past_failures() {
        let dir = tempdir().expect("tempdir");
        let engine = ApplyEngine::new(dir.path(), LOCAL);

        let mut bad = file_change(ChangeKind::Created, "bad.txt", b"x");
        bad.content = Some("%%%".to_string());
        let batch = vec![
            file_change(ChangeKind::Created, "one.txt", b"1"),
            bad,
            moved("missing.txt", "elsewhere.txt"),
            file_change(ChangeKind::Created, "two.txt", b"2"),
        ];

        let report = engine.apply_batch(&batch).await;
        assert_eq!(
            report,
            ApplyReport {
                applied: 2,
                skipped: 1,
                failed: 1
            }
        );
        assert!(dir.path().join("two.txt").exists());
    }

    #[tokio::test]
    async fn protected_journal_path_is_left_alone() {
        let dir = tempdir().expect("tempdir");
        let journal = dir.path().join("change_log.jsonl");
        fs::write(&journal, "keep").unwrap();
        let engine = ApplyEngine::new(dir.path(), LOCAL).with_protected_path(&journal);

        let record = change(ChangeKind::Deleted, "change_log.jsonl", false);
        assert_eq!(engine.apply_change(&record).await.unwrap(), ApplyOutcome::Skipped);
        assert!(journal.exists());
    }

    #[tokio::test]
    async fn applied_paths_are_registered_as_ignored() {
        let dir = tempdir().expect("tempdir");
        let ignored = Arc::new(IgnoredPaths::default());
        let engine = ApplyEngine::new(dir.path(), LOCAL).with_ignored_paths(ignored.clone());

        engine
            .apply_change(&file_change(ChangeKind::Created, "f.txt", b"x"))
            .await
            .unwrap();
        assert!(ignored.is_ignored(&dir.path().join("f.txt"), std::time::Instant::now()));
    }

    #[tokio::test]
    async fn snapshot_remote_newer_overwrites_and_restamps() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("doc.txt");
        fs::write(&path, "local").unwrap();
        stamp(&path, 100.0).await;
        let engine = ApplyEngine::new(dir.path(), LOCAL);

        let entry = SnapshotEntry {
            path: "doc.txt".to_string(),
            is_directory: false,
            content: Some(encode_content(b"remote")),
            last_modified: Some(200.0),
        };
        let report = engine.apply_full_snapshot(&[entry]).await;

        assert_eq!(report.applied, 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "remote");
        assert!((mtime_secs(&path) - 200.0).abs() < MTIME_EPSILON_SECS);
    }

    #[tokio::test]
    async fn snapshot_local_newer_is_kept() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("doc.txt");
        fs::write(&path, "local").unwrap();
        stamp(&path, 200.0).await;
        let engine = ApplyEngine::new(dir.path(), LOCAL);

        let entry = SnapshotEntry {
            path: "doc.txt".to_string(),
            is_directory: false,
            content: Some(encode_content(b"remote")),
            last_modified: Some(100.0),
        };
        let report = engine.apply_full_snapshot(&[entry]).await;

        assert_eq!(report.skipped, 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "local");
        assert!((mtime_secs(&path) - 200.0).abs() < MTIME_EPSILON_SECS);
    }

    #[tokio::test]
    async fn snapshot_within_epsilon_is_a_no_op_and_missing_entries_are_created() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("same.txt");
        fs::write(&path, "local").unwrap();
        stamp(&path, 150.0).await;
        let engine = ApplyEngine::new(dir.path(), LOCAL);

        let entries = vec![
            SnapshotEntry {
                path: "same.txt".to_string(),
                is_directory: false,
                content: Some(encode_content(b"remote")),
                last_modified: Some(150.005),
            },
            SnapshotEntry {
                path: "dir".to_string(),
                is_directory: true,
                content: None,
                last_modified: None,
            },
            SnapshotEntry {
                path: "dir/new.txt".to_string(),
                is_directory: false,
                content: Some(encode_content(b"fresh")),
                last_modified: Some(300.0),
            },
        ];
        let report = engine.apply_full_snapshot(&entries).await;

        assert_eq!(report.applied, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "local");
        assert_eq!(
            fs::read_to_string(dir.path().join("dir/new.txt")).unwrap(),
            "fresh"
        );
        assert!((mtime_secs(&dir.path().join("dir/new.txt")) - 300.0).abs() < MTIME_EPSILON_SECS);

        let again = engine.apply_full_snapshot(&entries).await;
        assert_eq!(again.applied, 0);
    }

    #[tokio::test]
    async fn out_of_range_snapshot_mtimes_fail_the_entry_without_writing() {
        let dir = tempdir().expect("tempdir");
        let engine = ApplyEngine::new(dir.path(), LOCAL);

        let entries: Vec<SnapshotEntry> = [1e300, f64::INFINITY, f64::NAN, -5.0]
            .into_iter()
            .enumerate()
            .map(|(i, secs)| SnapshotEntry {
                path: format!("odd-{}.txt", i),
                is_directory: false,
                content: Some(encode_content(b"remote")),
                last_modified: Some(secs),
            })
            .collect();
        let report = engine.apply_full_snapshot(&entries).await;

        assert_eq!(report.failed, 4);
        assert_eq!(report.applied, 0);
        assert!(!dir.path().join("odd-0.txt").exists());

        fs::write(dir.path().join("odd-0.txt"), "local").unwrap();
        assert!(matches!(
            engine.apply_snapshot_entry(&entries[0]).await,
            Err(ApplyError::InvalidMtime(_, _))
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join("odd-0.txt")).unwrap(),
            "local"
        );
    }

    #[test]
    fn mtime_conversion_rejects_unrepresentable_values() {
        assert!(secs_to_system_time(1e300).is_none());
        assert!(secs_to_system_time(f64::NAN).is_none());
        assert!(secs_to_system_time(-1.0).is_none());
        let when = secs_to_system_time(1_700_000_000.5).expect("valid");
        assert!((system_time_to_secs(when) - 1_700_000_000.5).abs() < 1e-6);
    }
}
