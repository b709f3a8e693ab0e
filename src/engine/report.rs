//! Per-run summary: classification counts and their human rendering.

#![allow(missing_docs)]

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::diff::{ChangeSet, RunMode};
use crate::engine::reconcile::MirrorOutcome;
use crate::manifest::BackendKind;

/// Counts gathered over one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub backend: BackendKind,
    pub manifest_path: PathBuf,
    /// Entries present in the manifest when it was loaded.
    pub baseline_entries: usize,
    pub files_listed: usize,
    pub unchanged: usize,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub renamed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<MirrorOutcome>,
}

impl SessionReport {
    pub fn new(
        changes: &ChangeSet,
        started_at: DateTime<Utc>,
        backend: BackendKind,
        manifest_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mode: changes.mode,
            started_at,
            elapsed_ms: 0,
            backend,
            manifest_path: manifest_path.into(),
            baseline_entries: 0,
            files_listed: 0,
            unchanged: changes.unchanged,
            added: changes.new.len(),
            modified: changes.modified.len(),
            deleted: changes.deleted.len(),
            renamed: changes.renamed.len(),
            mirror: None,
        }
    }

    #[must_use]
    pub fn total_changes(&self) -> usize {
        self.added + self.modified + self.deleted + self.renamed
    }

    #[must_use]
    pub fn has_modifications(&self) -> bool {
        self.mode == RunMode::Incremental && self.total_changes() > 0
    }

    /// Closing lines for the terminal.
    ///
    /// With `list_only`, only the "no modifications" notice survives.
    #[must_use]
    pub fn summary_lines(&self, list_only: bool) -> Vec<String> {
        let mut lines = Vec::new();
        match self.mode {
            RunMode::FirstIndex if !list_only => {
                lines.push("First indexing completed".to_string());
                lines.push(format!("Total: {} files indexed", self.added));
            }
            RunMode::FirstIndex => {}
            RunMode::Incremental if self.total_changes() == 0 => {
                lines.push("No modifications made".to_string());
            }
            RunMode::Incremental if !list_only => {
                lines.push(self.to_string());
                lines.push(format!(
                    "Total: {} changes across {} files",
                    self.total_changes(),
                    self.files_listed
                ));
            }
            RunMode::Incremental => {}
        }
        lines
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            RunMode::FirstIndex => f.write_str("First indexing completed"),
            RunMode::Incremental if self.total_changes() == 0 => {
                f.write_str("No modifications made")
            }
            RunMode::Incremental => write!(
                f,
                "{} files added, {} changed, deleted {}, renamed {}",
                self.added, self.modified, self.deleted, self.renamed
            ),
        }
    }
}
