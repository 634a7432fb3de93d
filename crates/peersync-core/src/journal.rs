//! Durable, append-only change journal.
//!
//! Records are stored one JSON document per line. Only the timestamp,
//! identity and byte range of each record are kept in memory; `query` reads
//! the matching lines back from the file, so file content never stays
//! resident. Appends go to the file first and only become visible to readers
//! once fully written.

use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::JournalError;
use crate::types::{ChangeRecord, RecordIdentity};

/// Where one record lives in the file.
#[derive(Debug, Clone)]
struct Entry {
    timestamp: String,
    offset: u64,
    len: usize,
}

#[derive(Default)]
struct Index {
    entries: Vec<Entry>,
    identities: HashSet<RecordIdentity>,
}

impl Index {
    fn push(&mut self, record: &ChangeRecord, offset: u64, len: usize) {
        self.identities.insert(record.identity());
        self.entries.push(Entry {
            timestamp: record.timestamp.clone(),
            offset,
            len,
        });
    }
}

struct Writer {
    file: File,
    /// Length of the file, i.e. the offset of the next line.
    end: u64,
    /// The file does not end with a newline (a torn write or a hand edit).
    needs_newline: bool,
}

/// Append-only store of [`ChangeRecord`]s, queried by timestamp cursor.
pub struct ChangeJournal {
    path: PathBuf,
    writer: Mutex<Writer>,
    index: RwLock<Index>,
}

impl ChangeJournal {
    /// Open the journal at `path`, creating an empty one when absent.
    ///
    /// A journal that cannot be parsed is reset to empty with a warning.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| JournalError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let mut index = Index::default();
        let mut end = 0;
        let mut needs_newline = false;
        match tokio::fs::read(&path).await {
            Ok(raw) => match scan_lines(&raw) {
                Ok(lines) => {
                    for (record, offset, len) in &lines {
                        index.push(record, *offset, *len);
                    }
                    end = raw.len() as u64;
                    needs_newline = raw.last().is_some_and(|b| *b != b'\n');
                    debug!(
                        "Loaded {} journal records from {}",
                        index.entries.len(),
                        path.display()
                    );
                }
                Err((line, e)) => {
                    warn!(
                        "Journal {} is corrupted at line {} ({}), resetting to empty",
                        path.display(),
                        line,
                        e
                    );
                    File::create(&path)
                        .await
                        .map_err(|source| JournalError::Io {
                            path: path.clone(),
                            source,
                        })?;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(JournalError::Io { path, source }),
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| JournalError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file,
                end,
                needs_newline,
            }),
            index: RwLock::new(index),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record. Returns `false` when an identical record was already
    /// journaled, in which case nothing is written.
    pub async fn append(&self, record: &ChangeRecord) -> Result<bool, JournalError> {
        let mut writer = self.writer.lock().await;

        if self
            .index
            .read()
            .await
            .identities
            .contains(&record.identity())
        {
            debug!("Skipping duplicate journal record {}", record.describe());
            return Ok(false);
        }

        let body = serde_json::to_vec(record)?;
        let mut line = Vec::with_capacity(body.len() + 2);
        if writer.needs_newline {
            line.push(b'\n');
        }
        let offset = writer.end + line.len() as u64;
        line.extend_from_slice(&body);
        line.push(b'\n');

        let written = match writer.file.write_all(&line).await {
            Ok(()) => writer.file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(source) = written {
            // Part of the line may have landed; realign with the file.
            if let Ok(meta) = writer.file.metadata().await {
                writer.end = meta.len();
            }
            writer.needs_newline = true;
            return Err(self.io_error(source));
        }
        writer.end += line.len() as u64;
        writer.needs_newline = false;

        self.index.write().await.push(record, offset, body.len());
        Ok(true)
    }

    /// All records with `timestamp > since`, in append order.
    pub async fn query(&self, since: &str) -> Result<Vec<ChangeRecord>, JournalError> {
        let wanted: Vec<Entry> = self
            .index
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.timestamp.as_str() > since)
            .cloned()
            .collect();
        self.read_entries(&wanted).await
    }

    /// Every record, in append order.
    pub async fn all(&self) -> Result<Vec<ChangeRecord>, JournalError> {
        let wanted = self.index.read().await.entries.clone();
        self.read_entries(&wanted).await
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Greatest timestamp in the journal.
    pub async fn latest_timestamp(&self) -> Option<String> {
        self.index
            .read()
            .await
            .entries
            .iter()
            .map(|e| e.timestamp.as_str())
            .max()
            .map(str::to_string)
    }

    async fn read_entries(&self, wanted: &[Entry]) -> Result<Vec<ChangeRecord>, JournalError> {
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)
            .await
            .map_err(|source| self.io_error(source))?;
        let mut records = Vec::with_capacity(wanted.len());
        let mut buf = Vec::new();
        let mut position = 0u64;
        for entry in wanted {
            if entry.offset != position {
                file.seek(SeekFrom::Start(entry.offset))
                    .await
                    .map_err(|source| self.io_error(source))?;
            }
            buf.resize(entry.len, 0);
            file.read_exact(&mut buf)
                .await
                .map_err(|source| self.io_error(source))?;
            position = entry.offset + entry.len as u64;

            let record = serde_json::from_slice(&buf).map_err(|source| JournalError::Decode {
                path: self.path.clone(),
                offset: entry.offset,
                source,
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn io_error(&self, source: std::io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Parse every non-blank line, returning each record with its byte range.
fn scan_lines(
    raw: &[u8],
) -> Result<Vec<(ChangeRecord, u64, usize)>, (usize, serde_json::Error)> {
    let mut lines = Vec::new();
    let mut offset = 0u64;
    for (i, line) in raw.split_inclusive(|b| *b == b'\n').enumerate() {
        let start = offset;
        offset += line.len() as u64;

        let body = line.strip_suffix(b"\n").unwrap_or(line);
        if body.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let record = serde_json::from_slice(body).map_err(|e| (i + 1, e))?;
        lines.push((record, start, body.len()));
    }
    Ok(lines)
}
