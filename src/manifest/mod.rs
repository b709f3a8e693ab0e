//! Persistent path → digest manifest with interchangeable backends.
//!
//! Both backends publish a run's mutations atomically at [`ManifestStore::commit`]:
//! a reader between runs sees either the previous complete manifest or the new
//! complete one, never a mix.

#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod text;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::config::Config;
use crate::core::errors::{PsyncError, Result};

/// Backend used to persist the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded SQLite database, one transaction per run.
    #[default]
    Sqlite,
    /// `<digest> <path>` lines, replaced through a temporary file.
    Text,
}

impl BackendKind {
    #[must_use]
    pub const fn default_extension(self) -> &'static str {
        match self {
            Self::Sqlite => "db",
            Self::Text => "txt",
        }
    }
}

/// One tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub digest: String,
    /// Epoch milliseconds of the run that last created or modified the entry.
    pub last_changed_at: i64,
    /// Whether the path was seen during the current run. Never persisted.
    #[serde(skip)]
    pub found: bool,
}

/// Capability interface the diff engine drives.
///
/// Call order within a run: `load` once, then any lookups and mutations, then
/// `commit` once. Dropping a store without committing discards the run.
pub trait ManifestStore {
    /// Open the persisted manifest and clear every entry's found flag.
    ///
    /// Returns `false` when no manifest existed yet (first indexing run).
    /// A manifest that exists but cannot be read is a fatal error.
    fn load(&mut self) -> Result<bool>;

    fn lookup(&self, path: &str) -> Result<Option<String>>;

    /// Every stored path whose digest equals `digest`.
    fn lookup_by_digest(&self, digest: &str) -> Result<Vec<String>>;

    /// Insert or overwrite `path`, marking it found.
    fn upsert(&mut self, path: &str, digest: &str, timestamp: i64) -> Result<()>;

    fn mark_found(&mut self, path: &str) -> Result<()>;

    /// Move the entry at `old_path` to `new_path`, keeping its digest and
    /// marking it found.
    fn rename(&mut self, old_path: &str, new_path: &str, timestamp: i64) -> Result<()>;

    /// Entries not marked found since `load`.
    fn unfound_entries(&self) -> Result<Vec<ManifestEntry>>;

    fn remove(&mut self, path: &str) -> Result<()>;

    /// Atomically publish everything changed since `load`.
    fn commit(&mut self) -> Result<()>;

    /// Number of entries currently held.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether `path` can be persisted by this backend. Paths it cannot hold
    /// are left untracked.
    fn can_store(&self, _path: &str) -> bool {
        true
    }

    /// Whether the diff engine should attempt rename detection at all.
    fn detects_renames(&self) -> bool {
        true
    }

    fn backend(&self) -> BackendKind;

    fn path(&self) -> &Path;
}

/// Open the manifest store described by `config`. Nothing is read until `load`.
pub fn open_store(config: &Config) -> Result<Box<dyn ManifestStore>> {
    let path = config.manifest_path();
    match config.manifest.backend {
        BackendKind::Text => Ok(Box::new(text::TextManifest::new(
            path,
            config.manifest.text_rename_scan,
        ))),
        #[cfg(feature = "sqlite")]
        BackendKind::Sqlite => Ok(Box::new(sqlite::SqliteManifest::new(path))),
        #[cfg(not(feature = "sqlite"))]
        BackendKind::Sqlite => Err(PsyncError::BackendUnavailable {
            details: "built without the `sqlite` feature; use the text backend".to_string(),
        }),
    }
}

pub(crate) fn not_loaded(op: &str) -> PsyncError {
    PsyncError::ManifestState {
        details: format!("{op} called before load()"),
    }
}

pub(crate) fn already_committed(op: &str) -> PsyncError {
    PsyncError::ManifestState {
        details: format!("{op} called after commit()"),
    }
}
