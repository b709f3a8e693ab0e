//! Change classification: compares the current listing against the manifest
//! baseline and drives the store's mutations.
//!
//! Per scanned path, in scan order:
//!
//! | store state                        | digest  | outcome                  |
//! |------------------------------------|---------|--------------------------|
//! | no baseline (first run)            | any     | `Indexed`, upsert        |
//! | key present                        | same    | `Unchanged`, mark found  |
//! | key present                        | differs | `Modified`, upsert       |
//! | key absent, one vanished candidate | any     | `Renamed`, rename        |
//! | key absent, otherwise              | any     | `New`, upsert            |
//!
//! A file that cannot be read at hash time is `Deleted`. Entries still
//! unfound after the whole listing has been processed are `Deleted` and
//! removed. The engine never commits; the caller does.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::errors::Result;
use crate::core::paths::{PathMode, manifest_key};
use crate::manifest::ManifestStore;
use crate::scanner::hasher::ContentHasher;

/// Whether a baseline manifest existed when the run started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    FirstIndex,
    Incremental,
}

/// Classification of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Indexed,
    Unchanged,
    New,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Indexed => "INDEXED",
            Self::Unchanged => "OK",
            Self::New => "NEW",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Renamed => "RENAMED",
        }
    }
}

/// Emitted once per classified path, as soon as the classification is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEvent<'a> {
    pub kind: ChangeKind,
    pub path: &'a str,
    /// Previous key of a renamed entry.
    pub from: Option<&'a str>,
    /// Digest now recorded for `path`, when one was computed.
    pub digest: Option<&'a str>,
}

impl fmt::Display for FileEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.from) {
            (ChangeKind::Renamed, Some(from)) => write!(f, "RENAMED {from} to {}", self.path),
            (kind, _) => write!(f, "{} {}", kind.label(), self.path),
        }
    }
}

/// One new, modified, or deleted path with its digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_digest: Option<String>,
}

/// Everything a run classified. First-run indexing records every file in `new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub mode: RunMode,
    pub unchanged: usize,
    pub new: Vec<FileChange>,
    pub modified: Vec<FileChange>,
    pub deleted: Vec<FileChange>,
    /// Old key → new key.
    pub renamed: BTreeMap<String, String>,
}

impl ChangeSet {
    #[must_use]
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            unchanged: 0,
            new: Vec::new(),
            modified: Vec::new(),
            deleted: Vec::new(),
            renamed: BTreeMap::new(),
        }
    }

    /// No path was added, changed, deleted, or renamed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }

    /// Whether a mirror has anything to copy or remove. Renames alone do not count.
    #[must_use]
    pub fn has_mirror_work(&self) -> bool {
        !(self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty())
    }
}

/// Classifies a listing against a loaded [`ManifestStore`].
pub struct DiffEngine<'s> {
    store: &'s mut dyn ManifestStore,
    hasher: ContentHasher,
    root: PathBuf,
    path_mode: PathMode,
    run_started_at: i64,
}

impl<'s> DiffEngine<'s> {
    pub fn new(
        store: &'s mut dyn ManifestStore,
        hasher: ContentHasher,
        root: impl Into<PathBuf>,
        path_mode: PathMode,
    ) -> Self {
        Self {
            store,
            hasher,
            root: root.into(),
            path_mode,
            run_started_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Override the timestamp written to every entry this run touches.
    #[must_use]
    pub fn with_run_timestamp(mut self, epoch_ms: i64) -> Self {
        self.run_started_at = epoch_ms;
        self
    }

    /// Classify `files` and apply the result to the store.
    ///
    /// `baseline_loaded` is what the store's `load()` returned. Only a
    /// non-recoverable error (store failure) aborts; files that cannot be
    /// read are reported as deleted.
    pub fn run<F>(
        &mut self,
        baseline_loaded: bool,
        files: &[PathBuf],
        mut on_event: F,
    ) -> Result<ChangeSet>
    where
        F: FnMut(&FileEvent<'_>),
    {
        let mode = if baseline_loaded {
            RunMode::Incremental
        } else {
            RunMode::FirstIndex
        };
        let mut changes = ChangeSet::new(mode);

        let keyed: Vec<(&Path, String)> = files
            .iter()
            .filter_map(|file| match manifest_key(&self.root, file, self.path_mode) {
                Some(key) if !self.store.can_store(&key) => {
                    warn!(path = %file.display(), "path cannot be stored in this manifest, skipping");
                    None
                }
                Some(key) => Some((file.as_path(), key)),
                None => {
                    warn!(path = %file.display(), "file outside source root, skipping");
                    None
                }
            })
            .collect();
        let listed: HashSet<&str> = keyed.iter().map(|(_, key)| key.as_str()).collect();

        let mut rename_sources: HashSet<String> = HashSet::new();
        let mut vanished: HashSet<String> = HashSet::new();

        for (file, key) in &keyed {
            let digest = match self.hasher.digest_file(file) {
                Ok(digest) => digest,
                Err(err) if err.is_recoverable() => {
                    warn!(path = %file.display(), error = %err, "file vanished before hashing");
                    let old_digest = if baseline_loaded {
                        self.store.lookup(key)?
                    } else {
                        None
                    };
                    on_event(&FileEvent {
                        kind: ChangeKind::Deleted,
                        path: key,
                        from: None,
                        digest: None,
                    });
                    changes.deleted.push(FileChange {
                        path: key.clone(),
                        old_digest,
                        new_digest: None,
                    });
                    vanished.insert(key.clone());
                    continue;
                }
                Err(err) => return Err(err),
            };

            if !baseline_loaded {
                self.store.upsert(key, &digest, self.run_started_at)?;
                emit(&mut on_event, ChangeKind::Indexed, key, None, &digest);
                changes.new.push(FileChange {
                    path: key.clone(),
                    old_digest: None,
                    new_digest: Some(digest),
                });
                continue;
            }

            match self.store.lookup(key)? {
                Some(old) if old == digest => {
                    self.store.mark_found(key)?;
                    emit(&mut on_event, ChangeKind::Unchanged, key, None, &digest);
                    changes.unchanged += 1;
                }
                Some(old) => {
                    self.store.upsert(key, &digest, self.run_started_at)?;
                    emit(&mut on_event, ChangeKind::Modified, key, None, &digest);
                    changes.modified.push(FileChange {
                        path: key.clone(),
                        old_digest: Some(old),
                        new_digest: Some(digest),
                    });
                }
                None => {
                    if let Some(source) = self.rename_source(&digest, &listed, &rename_sources)? {
                        self.store.rename(&source, key, self.run_started_at)?;
                        emit(&mut on_event, ChangeKind::Renamed, key, Some(source.as_str()), &digest);
                        rename_sources.insert(source.clone());
                        changes.renamed.insert(source, key.clone());
                    } else {
                        self.store.upsert(key, &digest, self.run_started_at)?;
                        emit(&mut on_event, ChangeKind::New, key, None, &digest);
                        changes.new.push(FileChange {
                            path: key.clone(),
                            old_digest: None,
                            new_digest: Some(digest),
                        });
                    }
                }
            }
        }

        // Only now is every surviving entry marked found.
        for entry in self.store.unfound_entries()? {
            self.store.remove(&entry.path)?;
            if vanished.contains(&entry.path) {
                continue;
            }
            on_event(&FileEvent {
                kind: ChangeKind::Deleted,
                path: &entry.path,
                from: None,
                digest: None,
            });
            changes.deleted.push(FileChange {
                path: entry.path,
                old_digest: Some(entry.digest),
                new_digest: None,
            });
        }

        debug!(
            mode = ?changes.mode,
            unchanged = changes.unchanged,
            new = changes.new.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            renamed = changes.renamed.len(),
            "classification finished"
        );
        Ok(changes)
    }

    /// The single stored path holding `digest`, provided it disappeared from
    /// the listing and has not already been claimed by another rename.
    fn rename_source(
        &self,
        digest: &str,
        listed: &HashSet<&str>,
        claimed: &HashSet<String>,
    ) -> Result<Option<String>> {
        if !self.store.detects_renames() {
            return Ok(None);
        }
        let mut candidates = self.store.lookup_by_digest(digest)?;
        if candidates.len() != 1 {
            return Ok(None);
        }
        let candidate = candidates.remove(0);
        if listed.contains(candidate.as_str()) || claimed.contains(&candidate) {
            return Ok(None);
        }
        Ok(Some(candidate))
    }
}

fn emit<F>(on_event: &mut F, kind: ChangeKind, path: &str, from: Option<&str>, digest: &str)
where
    F: FnMut(&FileEvent<'_>),
{
    on_event(&FileEvent {
        kind,
        path,
        from,
        digest: Some(digest),
    });
}

// ──────────────────── tests ────────────────────
