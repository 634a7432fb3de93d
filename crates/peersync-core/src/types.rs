//! Wire and journal types shared by every component.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{ApplyError, ChangeValidationError};

/// Fixed-width UTC timestamp format; string order equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Identifier of a node in the replication group.
pub type NodeId = String;

/// Format a point in time as a journal timestamp.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a journal timestamp. Only the canonical fixed-width form is
/// accepted, since cursors compare timestamps as strings.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let parsed = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    (format_timestamp(parsed) == ts).then_some(parsed)
}

/// Current wall-clock time as a journal timestamp.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Kind of filesystem mutation carried by a [`ChangeRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Moved => "moved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ChangeKind::Created),
            "modified" => Some(ChangeKind::Modified),
            "deleted" => Some(ChangeKind::Deleted),
            "moved" => Some(ChangeKind::Moved),
            _ => None,
        }
    }

    /// Whether records of this kind carry file content.
    pub fn carries_content(&self) -> bool {
        matches!(self, ChangeKind::Created | ChangeKind::Modified)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed or received filesystem mutation.
///
/// Records are immutable once journaled. `content` is the base64 encoding of
/// the whole file and is only present for non-directory `created`/`modified`
/// records whose content could be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub src: String,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    pub origin: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Fields that identify a record independently of its payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordIdentity {
    pub timestamp: String,
    pub origin: NodeId,
    pub kind: ChangeKind,
    pub src: String,
    pub dest: Option<String>,
}

impl ChangeRecord {
    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity {
            timestamp: self.timestamp.clone(),
            origin: self.origin.clone(),
            kind: self.kind,
            src: self.src.clone(),
            dest: self.dest.clone(),
        }
    }

    /// Decode the transported content, if any.
    pub fn decoded_content(&self) -> Result<Option<Vec<u8>>, ApplyError> {
        self.content
            .as_deref()
            .map(|encoded| {
                BASE64
                    .decode(encoded)
                    .map_err(|e| ApplyError::Encoding(self.src.clone(), e.to_string()))
            })
            .transpose()
    }

    /// Copy of this record without its payload, for notifications and listings.
    pub fn without_content(&self) -> Self {
        Self {
            content: None,
            ..self.clone()
        }
    }

    /// One-line human description, e.g. `moved: a.txt -> b.txt`.
    pub fn describe(&self) -> String {
        match &self.dest {
            Some(dest) => format!("{}: {} -> {}", self.kind, self.src, dest),
            None => format!("{}: {}", self.kind, self.src),
        }
    }
}

/// A change as received from an untrusted caller (`POST /push_change`).
///
/// Everything is optional so validation can report exactly what is missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingChange {
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub src: Option<String>,
    #[serde(default)]
    pub is_directory: bool,
    pub dest: Option<String>,
    pub origin: Option<String>,
    pub content: Option<String>,
}

impl IncomingChange {
    /// Validate and complete the change, filling `origin` with `default_origin`
    /// and `timestamp` with the current time when absent.
    pub fn into_record(self, default_origin: &str) -> Result<ChangeRecord, ChangeValidationError> {
        let timestamp = match self.timestamp {
            Some(ts) if parse_timestamp(&ts).is_none() => {
                return Err(ChangeValidationError::InvalidTimestamp(ts))
            }
            Some(ts) => ts,
            None => now_timestamp(),
        };

        let kind_str = self
            .kind
            .ok_or(ChangeValidationError::MissingField("type"))?;
        let kind = ChangeKind::parse(&kind_str)
            .ok_or_else(|| ChangeValidationError::UnknownKind(kind_str.clone()))?;

        let src = self.src.ok_or(ChangeValidationError::MissingField("src"))?;
        validate_relative(&src).map_err(ChangeValidationError::InvalidPath)?;

        let dest = match (kind, self.dest) {
            (ChangeKind::Moved, Some(dest)) => {
                validate_relative(&dest).map_err(ChangeValidationError::InvalidPath)?;
                Some(dest)
            }
            (ChangeKind::Moved, None) => return Err(ChangeValidationError::MissingField("dest")),
            (_, _) => None,
        };

        let content = match self.content {
            Some(encoded) if kind.carries_content() && !self.is_directory => {
                BASE64
                    .decode(&encoded)
                    .map_err(|e| ChangeValidationError::InvalidContent(e.to_string()))?;
                Some(encoded)
            }
            _ => None,
        };

        let origin = self
            .origin
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| default_origin.to_string());

        Ok(ChangeRecord {
            timestamp,
            kind,
            src,
            is_directory: self.is_directory,
            dest,
            origin,
            content,
        })
    }
}

/// One row of a full-tree enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub path: String,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<f64>,
}

/// Encode raw bytes for transport.
pub fn encode_content(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Check that `rel` is a non-empty relative path that stays inside the root.
pub fn validate_relative(rel: &str) -> Result<(), String> {
    if rel.is_empty() {
        return Err("path is empty".to_string());
    }
    let path = Path::new(rel);
    let mut named = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => named += 1,
            Component::CurDir => {}
            Component::ParentDir => return Err(format!("path escapes the root: {}", rel)),
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("path is not relative: {}", rel))
            }
        }
    }
    if named == 0 {
        return Err(format!("path names the root itself: {}", rel));
    }
    Ok(())
}

/// Join a wire path onto the watched root after validating it.
pub fn resolve_under(root: &Path, rel: &str) -> Result<PathBuf, ApplyError> {
    validate_relative(rel).map_err(ApplyError::InvalidPath)?;
    Ok(rel
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .fold(root.to_path_buf(), |acc, part| acc.join(part)))
}

/// Express `path` relative to `root` using `/` separators.
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_are_fixed_width_and_ordered() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        let a = format_timestamp(early);
        let b = format_timestamp(late);
        assert_eq!(a, "2024-01-02T03:04:05.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn only_canonical_timestamps_parse() {
        assert!(parse_timestamp("2024-01-02T03:04:05.000000Z").is_some());
        assert!(parse_timestamp(&now_timestamp()).is_some());
        for bad in [
            "zzzz",
            "",
            "2024-01-02T03:04:05Z",
            "2024-01-02T03:04:05.1Z",
            "2024-01-02 03:04:05.000000",
            "2024-13-02T03:04:05.000000Z",
        ] {
            assert!(parse_timestamp(bad).is_none(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn incoming_change_rejects_malformed_timestamps() {
        let incoming = IncomingChange {
            timestamp: Some("zzzz".to_string()),
            kind: Some("deleted".to_string()),
            src: Some("a.txt".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            incoming.into_record("x"),
            Err(ChangeValidationError::InvalidTimestamp(ts)) if ts == "zzzz"
        ));

        let canonical = IncomingChange {
            timestamp: Some("2024-01-02T03:04:05.000000Z".to_string()),
            kind: Some("deleted".to_string()),
            src: Some("a.txt".to_string()),
            ..Default::default()
        };
        let record = canonical.into_record("x").unwrap();
        assert_eq!(record.timestamp, "2024-01-02T03:04:05.000000Z");
    }

    #[test]
    fn change_record_wire_format() {
        let record = ChangeRecord {
            timestamp: "2024-01-01T00:00:00.000000Z".to_string(),
            kind: ChangeKind::Moved,
            src: "a.txt".to_string(),
            is_directory: false,
            dest: Some("b.txt".to_string()),
            origin: "node-a".to_string(),
            content: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "moved");
        assert_eq!(json["dest"], "b.txt");
        assert!(json.get("content").is_none());

        let parsed: ChangeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn incoming_change_defaults_origin_and_timestamp() {
        let incoming = IncomingChange {
            kind: Some("created".to_string()),
            src: Some("dir/file.txt".to_string()),
            content: Some(encode_content(b"hi")),
            ..Default::default()
        };
        let record = incoming.into_record("user-127.0.0.1").unwrap();
        assert_eq!(record.origin, "user-127.0.0.1");
        assert_eq!(record.kind, ChangeKind::Created);
        assert_eq!(record.timestamp.len(), "2024-01-02T03:04:05.000000Z".len());
        assert_eq!(record.decoded_content().unwrap(), Some(b"hi".to_vec()));
    }

    #[test]
    fn incoming_change_rejects_missing_fields() {
        let missing_type = IncomingChange {
            src: Some("a".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            missing_type.into_record("x"),
            Err(ChangeValidationError::MissingField("type"))
        ));

        let moved_without_dest = IncomingChange {
            kind: Some("moved".to_string()),
            src: Some("a".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            moved_without_dest.into_record("x"),
            Err(ChangeValidationError::MissingField("dest"))
        ));

        let bogus_kind = IncomingChange {
            kind: Some("renamed".to_string()),
            src: Some("a".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bogus_kind.into_record("x"),
            Err(ChangeValidationError::UnknownKind(_))
        ));
    }

    #[test]
    fn incoming_change_rejects_escaping_paths_and_bad_content() {
        let escaping = IncomingChange {
            kind: Some("deleted".to_string()),
            src: Some("../etc/passwd".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            escaping.into_record("x"),
            Err(ChangeValidationError::InvalidPath(_))
        ));

        let bad_content = IncomingChange {
            kind: Some("modified".to_string()),
            src: Some("a.txt".to_string()),
            content: Some("!!not base64!!".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bad_content.into_record("x"),
            Err(ChangeValidationError::InvalidContent(_))
        ));
    }

    #[test]
    fn relative_paths_round_trip_through_root() {
        let root = Path::new("/srv/root");
        let abs = resolve_under(root, "a/b/c.txt").unwrap();
        assert_eq!(abs, PathBuf::from("/srv/root/a/b/c.txt"));
        assert_eq!(relative_to(root, &abs).as_deref(), Some("a/b/c.txt"));
        assert_eq!(relative_to(root, root), None);
        assert!(resolve_under(root, "/abs").is_err());
    }
}
