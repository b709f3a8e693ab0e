//! Line-oriented manifest: one `<hex digest> <path>` line per entry.
//!
//! The whole manifest is held in memory for the run. `commit` writes the full
//! new manifest to a sibling temporary file, syncs it, and renames it over the
//! original, so the original is untouched until the replacement is complete.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::errors::{PsyncError, Result};
use crate::manifest::{
    BackendKind, ManifestEntry, ManifestStore, already_committed, not_loaded,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreState {
    Unloaded,
    Open,
    Committed,
}

#[derive(Debug, Clone)]
struct TextEntry {
    digest: String,
    last_changed_at: i64,
    found: bool,
}

/// Text-file manifest store.
#[derive(Debug)]
pub struct TextManifest {
    path: PathBuf,
    tmp_path: PathBuf,
    rename_scan: bool,
    entries: HashMap<String, TextEntry>,
    malformed_lines: usize,
    state: StoreState,
}

impl TextManifest {
    /// `rename_scan` enables the linear digest scan used for rename detection.
    pub fn new(path: impl Into<PathBuf>, rename_scan: bool) -> Self {
        let path = path.into();
        let mut tmp: OsString = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp),
            rename_scan,
            entries: HashMap::new(),
            malformed_lines: 0,
            state: StoreState::Unloaded,
        }
    }

    /// Temporary file the next manifest is staged in.
    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Lines dropped as malformed during `load`.
    pub fn malformed_lines(&self) -> usize {
        self.malformed_lines
    }

    fn ensure_open(&self, op: &str) -> Result<()> {
        match self.state {
            StoreState::Open => Ok(()),
            StoreState::Unloaded => Err(not_loaded(op)),
            StoreState::Committed => Err(already_committed(op)),
        }
    }

    fn parse(&mut self, bytes: &[u8]) {
        let mut start = 0;
        let mut line_no = 0;
        let ends = memchr::memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
        for end in ends {
            let raw = &bytes[start..end];
            start = end + 1;
            line_no += 1;
            if raw.is_empty() {
                continue;
            }
            match parse_line(line_no, raw) {
                Ok((digest, path)) => {
                    self.entries.insert(
                        path,
                        TextEntry {
                            digest,
                            last_changed_at: 0,
                            found: false,
                        },
                    );
                }
                Err(err) => {
                    warn!(manifest = %self.path.display(), "{err}");
                    self.malformed_lines += 1;
                }
            }
        }
    }

    fn entry_mut(&mut self, path: &str, op: &str) -> Result<&mut TextEntry> {
        self.entries
            .get_mut(path)
            .ok_or_else(|| PsyncError::ManifestState {
                details: format!("{op}: no manifest entry for {path}"),
            })
    }

    fn write_tmp(&self) -> Result<()> {
        if let Some(parent) = self.tmp_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| PsyncError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.tmp_path)
            .map_err(|e| PsyncError::io(&self.tmp_path, e))?;

        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();

        let mut writer = BufWriter::new(file);
        for key in keys {
            let entry = &self.entries[key];
            writeln!(writer, "{} {key}", entry.digest)
                .map_err(|e| PsyncError::io(&self.tmp_path, e))?;
        }
        writer.flush().map_err(|e| PsyncError::io(&self.tmp_path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| PsyncError::io(&self.tmp_path, e))?;
        Ok(())
    }
}

fn unstorable(path: &str) -> PsyncError {
    PsyncError::ManifestState {
        details: format!("path {path:?} contains a line break"),
    }
}

/// Split one manifest line at its first space into `(digest, path)`.
pub fn parse_line(line_no: usize, raw: &[u8]) -> Result<(String, String)> {
    let malformed = || PsyncError::MalformedManifestLine {
        line_no,
        line: String::from_utf8_lossy(raw).into_owned(),
    };
    let split = memchr::memchr(b' ', raw).ok_or_else(malformed)?;
    let (digest, path) = (&raw[..split], &raw[split + 1..]);
    if digest.is_empty() || path.is_empty() {
        return Err(malformed());
    }
    let digest = std::str::from_utf8(digest).map_err(|_| malformed())?;
    let path = std::str::from_utf8(path).map_err(|_| malformed())?;
    Ok((digest.to_string(), path.to_string()))
}

impl ManifestStore for TextManifest {
    fn load(&mut self) -> Result<bool> {
        if self.state != StoreState::Unloaded {
            return Err(PsyncError::ManifestState {
                details: "load() called twice".to_string(),
            });
        }
        self.entries.clear();
        self.malformed_lines = 0;

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.state = StoreState::Open;
                return Ok(false);
            }
            Err(err) => return Err(PsyncError::unreadable(&self.path, err)),
        };

        self.parse(&bytes);
        self.state = StoreState::Open;
        debug!(
            entries = self.entries.len(),
            malformed = self.malformed_lines,
            "text manifest loaded"
        );
        Ok(true)
    }

    fn lookup(&self, path: &str) -> Result<Option<String>> {
        self.ensure_open("lookup")?;
        Ok(self.entries.get(path).map(|e| e.digest.clone()))
    }

    fn lookup_by_digest(&self, digest: &str) -> Result<Vec<String>> {
        self.ensure_open("lookup_by_digest")?;
        let mut paths: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.digest == digest)
            .map(|(p, _)| p.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn upsert(&mut self, path: &str, digest: &str, timestamp: i64) -> Result<()> {
        self.ensure_open("upsert")?;
        if !self.can_store(path) {
            return Err(unstorable(path));
        }
        self.entries.insert(
            path.to_string(),
            TextEntry {
                digest: digest.to_string(),
                last_changed_at: timestamp,
                found: true,
            },
        );
        Ok(())
    }

    fn mark_found(&mut self, path: &str) -> Result<()> {
        self.ensure_open("mark_found")?;
        self.entry_mut(path, "mark_found")?.found = true;
        Ok(())
    }

    fn rename(&mut self, old_path: &str, new_path: &str, timestamp: i64) -> Result<()> {
        self.ensure_open("rename")?;
        if !self.can_store(new_path) {
            return Err(unstorable(new_path));
        }
        if self.entries.contains_key(new_path) {
            return Err(PsyncError::ManifestState {
                details: format!("rename: {new_path} is already tracked"),
            });
        }
        let mut entry = self
            .entries
            .remove(old_path)
            .ok_or_else(|| PsyncError::ManifestState {
                details: format!("rename: no manifest entry for {old_path}"),
            })?;
        entry.found = true;
        entry.last_changed_at = timestamp;
        self.entries.insert(new_path.to_string(), entry);
        Ok(())
    }

    fn unfound_entries(&self) -> Result<Vec<ManifestEntry>> {
        self.ensure_open("unfound_entries")?;
        let mut unfound: Vec<ManifestEntry> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.found)
            .map(|(path, e)| ManifestEntry {
                path: path.clone(),
                digest: e.digest.clone(),
                last_changed_at: e.last_changed_at,
                found: false,
            })
            .collect();
        unfound.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(unfound)
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        self.ensure_open("remove")?;
        self.entries.remove(path);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.ensure_open("commit")?;
        self.write_tmp()?;
        fs::rename(&self.tmp_path, &self.path).map_err(|e| PsyncError::io(&self.path, e))?;
        self.state = StoreState::Committed;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }

    fn detects_renames(&self) -> bool {
        self.rename_scan
    }

    /// One entry per line, so a path containing a line break cannot be stored.
    fn can_store(&self, path: &str) -> bool {
        !path.contains('\n')
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Text
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
