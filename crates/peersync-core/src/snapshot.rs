//! Full enumeration of the watched tree.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;
use walkdir::WalkDir;

use crate::apply::system_time_to_secs;
use crate::outbox::PendingOutbox;
use crate::types::{encode_content, relative_to, SnapshotEntry};

/// Every file and directory under `root`, excluding `root` itself and
/// `exclude` (the journal file).
///
/// Files that cannot be read are skipped with a warning.
pub fn enumerate_tree(root: &Path, exclude: Option<&Path>) -> Vec<SnapshotEntry> {
    let mut entries = Vec::new();
    for entry in walk(root) {
        let path = entry.path();
        if exclude.is_some_and(|ex| ex == path) {
            continue;
        }
        let Some(rel) = relative_to(root, path) else {
            continue;
        };

        if entry.file_type().is_dir() {
            entries.push(SnapshotEntry {
                path: rel,
                is_directory: true,
                content: None,
                last_modified: None,
            });
            continue;
        }

        let content = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping unreadable file {}: {}", path.display(), e);
                continue;
            }
        };
        let last_modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(system_time_to_secs);

        entries.push(SnapshotEntry {
            path: rel,
            is_directory: false,
            content: Some(encode_content(&content)),
            last_modified,
        });
    }
    entries
}

/// Sync state of a single file, as shown by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    pub mtime: f64,
    /// `"modified"` while a local change to the file awaits a push, else `"synced"`.
    pub status: String,
}

/// Files under `root` with their pending state.
pub fn file_statuses(
    root: &Path,
    exclude: Option<&Path>,
    outbox: &PendingOutbox,
) -> Vec<FileStatus> {
    walk(root)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !exclude.is_some_and(|ex| ex == entry.path()))
        .filter_map(|entry| {
            let rel = relative_to(root, entry.path())?;
            let mtime = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(system_time_to_secs)
                .unwrap_or_default();
            let status = if outbox.touches(&rel) {
                "modified"
            } else {
                "synced"
            };
            Some(FileStatus {
                path: rel,
                mtime,
                status: status.to_string(),
            })
        })
        .collect()
}

fn walk(root: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping entry during walk: {}", e);
                None
            }
        })
}
