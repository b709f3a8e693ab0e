//! One run end to end: load → list → classify → commit → report, and then,
//! separately, mirror reconciliation.
//!
//! The mirror is only touched after the manifest commit succeeded, so a
//! failed or declined reconciliation never affects manifest state.

#![allow(missing_docs)]

use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::paths::resolve_absolute_path;
use crate::engine::diff::{ChangeSet, DiffEngine, FileEvent};
use crate::engine::reconcile::{ConfirmPrompt, MirrorAction, MirrorOutcome, ReconciliationEngine};
use crate::engine::report::SessionReport;
use crate::logger::jsonl::{JournalConfig, JournalEntry, JournalEvent, JournalWriter};
use crate::manifest::open_store;
use crate::scanner::hasher::ContentHasher;
use crate::scanner::walker::TreeScanner;

/// Receives progress as a run advances. Every method defaults to a no-op.
pub trait RunObserver {
    /// Coarse progress ("Listing directory", "Found 12 files").
    fn progress(&mut self, _message: &str) {}

    fn file_event(&mut self, _event: &FileEvent<'_>) {}

    fn mirror_action(&mut self, _action: &MirrorAction<'_>) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub report: SessionReport,
    pub changes: ChangeSet,
}

/// Drives a run for one validated [`Config`].
pub struct Pipeline<'c> {
    config: &'c Config,
    journal: Option<JournalWriter>,
}

impl<'c> Pipeline<'c> {
    pub fn new(config: &'c Config) -> Self {
        let journal = config
            .output
            .journal_path
            .as_ref()
            .map(|path| JournalWriter::open(JournalConfig::new(path)));
        Self { config, journal }
    }

    /// Classify the source tree against the manifest and commit the result.
    ///
    /// Fails before scanning when the manifest cannot be opened or read, and
    /// never commits a partially classified run.
    pub fn sync(&mut self, observer: &mut dyn RunObserver) -> Result<RunOutcome> {
        self.journal(
            JournalEntry::new(JournalEvent::RunStart)
                .path(self.config.scan.source_root.to_string_lossy()),
        );
        let result = self.sync_inner(observer);
        match &result {
            Ok(outcome) => self.journal(
                JournalEntry::new(JournalEvent::RunComplete).details(outcome.report.to_string()),
            ),
            Err(err) => {
                let mut entry = JournalEntry::new(JournalEvent::RunFailed).details(err.to_string());
                entry.error_code = Some(err.code().to_string());
                self.journal(entry);
            }
        }
        result
    }

    fn sync_inner(&mut self, observer: &mut dyn RunObserver) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let config = self.config;
        let scan = &config.scan;

        let mut store = open_store(config)?;
        observer.progress("Loading saved hashes");
        let loaded = store.load()?;
        let baseline_entries = if loaded { store.len()? } else { 0 };
        if loaded {
            observer.progress(&format!("{baseline_entries} hashes loaded"));
        }

        observer.progress("Listing directory");
        let mut scanner = TreeScanner::new().exclude_manifest(resolve_absolute_path(store.path()));
        if store.path().is_absolute() {
            scanner = scanner.exclude_manifest(store.path());
        }
        let files = scanner.list(&scan.source_root)?;
        observer.progress(&format!("Found {} files", files.len()));

        let hasher = ContentHasher::new(scan.algorithm, scan.chunk_size_bytes);
        let journal = &mut self.journal;
        let changes = DiffEngine::new(store.as_mut(), hasher, &scan.source_root, scan.path_mode)
            .run(loaded, &files, |event| {
                observer.file_event(event);
                if let Some(journal) = journal.as_mut() {
                    journal.write_entry(&JournalEntry::from_file_event(event));
                }
            })?;

        store.commit()?;
        debug!(path = %store.path().display(), "manifest committed");

        let mut report = SessionReport::new(&changes, started_at, store.backend(), store.path());
        report.baseline_entries = baseline_entries;
        report.files_listed = files.len();
        report.elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            files = report.files_listed,
            changes = report.total_changes(),
            elapsed_ms = report.elapsed_ms,
            "run committed"
        );
        Ok(RunOutcome { report, changes })
    }

    /// Apply a committed run to the configured mirror, if any.
    ///
    /// Returns `None` when no mirror is configured or there is nothing to do.
    pub fn reconcile(
        &mut self,
        outcome: &mut RunOutcome,
        prompt: Option<&mut dyn ConfirmPrompt>,
        observer: &mut dyn RunObserver,
    ) -> Result<Option<MirrorOutcome>> {
        let config = self.config;
        let Some(target) = &config.mirror.target else {
            return Ok(None);
        };
        if !outcome.changes.has_mirror_work() {
            return Ok(None);
        }

        let engine =
            ReconciliationEngine::new(&config.scan.source_root, target, config.scan.path_mode);
        let journal = &mut self.journal;
        let mirror = engine.apply(&outcome.changes, prompt, |action| {
            observer.mirror_action(action);
            if let Some(journal) = journal.as_mut() {
                journal.write_entry(&JournalEntry::from_mirror_action(action));
            }
        })?;

        if mirror.declined {
            self.journal(
                JournalEntry::new(JournalEvent::MirrorDeclined).path(target.to_string_lossy()),
            );
        }
        outcome.report.mirror = Some(mirror.clone());
        Ok(Some(mirror))
    }

    fn journal(&mut self, entry: JournalEntry) {
        if let Some(journal) = self.journal.as_mut() {
            journal.write_entry(&entry);
        }
    }
}

impl Drop for Pipeline<'_> {
    fn drop(&mut self) {
        if let Some(journal) = self.journal.as_mut() {
            journal.sync();
        }
    }
}
