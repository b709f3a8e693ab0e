//! Mirror reconciliation: apply a committed [`ChangeSet`] to a backup directory.
//!
//! New and modified files are copied over, deleted files are removed. Renames
//! are not replayed on the mirror. Per-file failures are logged and counted;
//! they never abort the remaining work.

#![allow(missing_docs)]

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::errors::{PsyncError, Result};
use crate::core::paths::{PathMode, mirror_relative, source_path};
use crate::engine::diff::ChangeSet;

/// Question asked before the mirror is touched.
pub const CONFIRM_QUESTION: &str = "Do you want to copy modified and delete removed files?";

/// Yes/no confirmation source.
pub trait ConfirmPrompt {
    fn confirm(&mut self, question: &str) -> io::Result<bool>;
}

/// Line-based prompt that re-asks until the answer starts with `y` or `n`.
///
/// End of input counts as "no".
pub struct LinePrompt<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl LinePrompt<io::StdinLock<'static>, io::Stdout> {
    /// Prompt on the process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConfirmPrompt for LinePrompt<R, W> {
    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        loop {
            write!(self.writer, "{question} y/n ")?;
            self.writer.flush()?;

            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(false);
            }
            match line.trim_start().chars().next().map(|c| c.to_ascii_lowercase()) {
                Some('y') => return Ok(true),
                Some('n') => return Ok(false),
                _ => {}
            }
        }
    }
}

/// A single mirror operation, reported as it happens.
#[derive(Debug, Clone, Copy)]
pub enum MirrorAction<'a> {
    CreateDir { path: &'a Path },
    Copy { from: &'a Path, to: &'a Path },
    Remove { path: &'a Path },
    Skip { key: &'a str, reason: &'static str },
    Fail { key: &'a str, error: &'a PsyncError },
}

/// Counts for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorOutcome {
    pub copied: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The user answered "no"; nothing was touched.
    pub declined: bool,
}

/// Applies changes from one source root to one mirror directory.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    source_root: PathBuf,
    target: PathBuf,
    path_mode: PathMode,
}

impl ReconciliationEngine {
    pub fn new(
        source_root: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        path_mode: PathMode,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            target: target.into(),
            path_mode,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Mirror `changes`. With a `prompt`, nothing happens unless it confirms.
    ///
    /// Only a failing prompt is an error; file-level failures end up in
    /// [`MirrorOutcome::failed`].
    pub fn apply<F>(
        &self,
        changes: &ChangeSet,
        prompt: Option<&mut dyn ConfirmPrompt>,
        mut on_action: F,
    ) -> Result<MirrorOutcome>
    where
        F: FnMut(&MirrorAction<'_>),
    {
        let mut outcome = MirrorOutcome::default();
        if !changes.has_mirror_work() {
            return Ok(outcome);
        }

        if let Some(prompt) = prompt {
            let accepted = prompt
                .confirm(CONFIRM_QUESTION)
                .map_err(|source| PsyncError::Io {
                    path: PathBuf::from("<stdin>"),
                    source,
                })?;
            if !accepted {
                outcome.declined = true;
                return Ok(outcome);
            }
        }

        for change in changes.modified.iter().chain(&changes.new) {
            let key = change.path.as_str();
            let Some(rel) = self.mirror_path(key, &mut on_action) else {
                outcome.skipped += 1;
                continue;
            };
            let from = source_path(&self.source_root, key, self.path_mode);
            if !from.is_file() {
                on_action(&MirrorAction::Skip {
                    key,
                    reason: "source vanished",
                });
                outcome.skipped += 1;
                continue;
            }
            let to = self.target.join(rel);
            match copy_file(&from, &to, &mut on_action) {
                Ok(()) => outcome.copied += 1,
                Err(err) => {
                    warn!(path = key, error = %err, "mirror copy failed");
                    on_action(&MirrorAction::Fail { key, error: &err });
                    outcome.failed += 1;
                }
            }
        }

        for change in &changes.deleted {
            let key = change.path.as_str();
            let Some(rel) = self.mirror_path(key, &mut on_action) else {
                outcome.skipped += 1;
                continue;
            };
            let path = self.target.join(rel);
            if !path.is_file() {
                outcome.skipped += 1;
                continue;
            }
            on_action(&MirrorAction::Remove { path: &path });
            match fs::remove_file(&path) {
                Ok(()) => outcome.removed += 1,
                Err(source) => {
                    let err = PsyncError::MirrorIo {
                        path: path.clone(),
                        source,
                    };
                    warn!(path = key, error = %err, "mirror removal failed");
                    on_action(&MirrorAction::Fail { key, error: &err });
                    outcome.failed += 1;
                }
            }
        }

        debug!(
            target = %self.target.display(),
            copied = outcome.copied,
            removed = outcome.removed,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "mirror reconciled"
        );
        Ok(outcome)
    }

    fn mirror_path<F>(&self, key: &str, on_action: &mut F) -> Option<PathBuf>
    where
        F: FnMut(&MirrorAction<'_>),
    {
        let rel = mirror_relative(&self.source_root, key, self.path_mode);
        if rel.is_none() {
            warn!(path = key, "key escapes the mirror directory, skipping");
            on_action(&MirrorAction::Skip {
                key,
                reason: "outside mirror",
            });
        }
        rel
    }
}

fn copy_file<F>(from: &Path, to: &Path, on_action: &mut F) -> Result<()>
where
    F: FnMut(&MirrorAction<'_>),
{
    let mirror_io = |path: &Path, source: io::Error| PsyncError::MirrorIo {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = to.parent()
        && !parent.is_dir()
    {
        on_action(&MirrorAction::CreateDir { path: parent });
        fs::create_dir_all(parent).map_err(|e| mirror_io(parent, e))?;
    }
    on_action(&MirrorAction::Copy { from, to });
    fs::copy(from, to).map_err(|e| mirror_io(to, e))?;
    Ok(())
}
