//! Run journal: append-only line-delimited JSON, one object per event.
//!
//! Each line is assembled in memory and written with a single `write_all`, so
//! a journal tailed by another process never shows a partial line.
//!
//! Degradation chain:
//! 1. Journal file
//! 2. stderr with `[PSY-JSONL]` prefix
//! 3. Silent discard (a run never fails because its journal does)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{PsyncError, Result};
use crate::engine::diff::{ChangeKind, FileEvent};
use crate::engine::reconcile::MirrorAction;

/// Journal event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    RunStart,
    RunComplete,
    RunFailed,
    Indexed,
    Unchanged,
    New,
    Modified,
    Deleted,
    Renamed,
    MirrorMkdir,
    MirrorCopy,
    MirrorRemove,
    MirrorSkip,
    MirrorError,
    MirrorDeclined,
}

impl From<ChangeKind> for JournalEvent {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Indexed => Self::Indexed,
            ChangeKind::Unchanged => Self::Unchanged,
            ChangeKind::New => Self::New,
            ChangeKind::Modified => Self::Modified,
            ChangeKind::Deleted => Self::Deleted,
            ChangeKind::Renamed => Self::Renamed,
        }
    }
}

/// A single journal line. Everything but `ts` and `event` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    pub event: JournalEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Previous key of a rename, or copy source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl JournalEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: JournalEvent) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            path: None,
            from: None,
            digest: None,
            error_code: None,
            details: None,
        }
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn from_file_event(event: &FileEvent<'_>) -> Self {
        let mut entry = Self::new(event.kind.into()).path(event.path);
        entry.from = event.from.map(str::to_string);
        entry.digest = event.digest.map(str::to_string);
        entry
    }

    pub fn from_mirror_action(action: &MirrorAction<'_>) -> Self {
        match *action {
            MirrorAction::CreateDir { path } => {
                Self::new(JournalEvent::MirrorMkdir).path(path.to_string_lossy())
            }
            MirrorAction::Copy { from, to } => {
                let mut entry = Self::new(JournalEvent::MirrorCopy).path(to.to_string_lossy());
                entry.from = Some(from.to_string_lossy().into_owned());
                entry
            }
            MirrorAction::Remove { path } => {
                Self::new(JournalEvent::MirrorRemove).path(path.to_string_lossy())
            }
            MirrorAction::Skip { key, reason } => {
                Self::new(JournalEvent::MirrorSkip).path(key).details(reason)
            }
            MirrorAction::Fail { key, error } => {
                let mut entry = Self::new(JournalEvent::MirrorError)
                    .path(key)
                    .details(error.to_string());
                entry.error_code = Some(error.code().to_string());
                entry
            }
        }
    }
}

/// Degradation state of the journal writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

/// Configuration for the journal writer.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub path: PathBuf,
    /// Size at which the journal is rotated before the next write. Default: 16 MiB.
    pub max_size_bytes: u64,
    /// Number of rotated files to keep. Default: 3.
    pub max_rotated_files: u32,
}

impl JournalConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

/// Append-only journal writer with size rotation and stderr fallback.
pub struct JournalWriter {
    config: JournalConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
}

impl JournalWriter {
    /// Open the journal. Falls through the degradation chain on failure.
    pub fn open(config: JournalConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
        };
        match open_append(&w.config.path) {
            Ok((file, size)) => {
                w.writer = Some(BufWriter::new(file));
                w.state = WriterState::Normal;
                w.bytes_written = size;
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[PSY-JSONL] {e}; journaling to stderr");
                w.state = WriterState::Stderr;
            }
        }
        w
    }

    /// Write a single entry as one JSONL line.
    pub fn write_entry(&mut self, entry: &JournalEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[PSY-JSONL] serialize error: {e}");
                return;
            }
        };
        self.write_line(&line);
    }

    /// Flush and fsync the journal file.
    pub fn sync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    // ──────────────────────── internals ────────────────────────

    fn write_line(&mut self, line: &str) {
        if self.state == WriterState::Normal
            && self.bytes_written > 0
            && self.bytes_written + line.len() as u64 > self.config.max_size_bytes
        {
            self.rotate();
        }

        match self.state {
            WriterState::Normal => {
                if let Some(w) = self.writer.as_mut()
                    && w.write_all(line.as_bytes()).is_ok()
                {
                    self.bytes_written += line.len() as u64;
                    return;
                }
                self.degrade();
                self.write_line(line);
            }
            WriterState::Stderr => {
                if write!(io::stderr(), "[PSY-JSONL] {line}").is_err() {
                    self.degrade();
                }
            }
            WriterState::Discard => {}
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        self.state = match self.state {
            WriterState::Normal => {
                let _ = writeln!(io::stderr(), "[PSY-JSONL] journal write failed, using stderr");
                WriterState::Stderr
            }
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
    }

    fn rotate(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;
        let base = self.config.path.clone();

        // .N-1 → .N, …, current → .1
        let _ = fs::remove_file(rotated_name(&base, self.config.max_rotated_files));
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::new(file));
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| PsyncError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| PsyncError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `run.jsonl` → `run.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────
