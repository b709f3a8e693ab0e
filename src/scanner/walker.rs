//! Depth-first directory walker yielding the regular files under a root.
//!
//! Traversal uses an explicit work stack, so tree depth never grows the call
//! stack. Symlinked directories are never descended; symlinks that resolve to
//! regular files are yielded like the files themselves.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::errors::{PsyncError, Result};

/// Suffixes of the files a manifest store writes next to itself.
const MANIFEST_SIDE_SUFFIXES: [&str; 4] = [".tmp", "-journal", "-wal", "-shm"];

/// Lists the files a run should hash.
#[derive(Debug, Clone, Default)]
pub struct TreeScanner {
    excluded: HashSet<PathBuf>,
}

impl TreeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the manifest at `path` and its side files (`hashes.txt.tmp`,
    /// `hashes.db-journal`, `hashes.db-wal`, `hashes.db-shm`).
    #[must_use]
    pub fn exclude_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        for suffix in MANIFEST_SIDE_SUFFIXES {
            let mut side: OsString = path.clone().into_os_string();
            side.push(suffix);
            self.excluded.insert(PathBuf::from(side));
        }
        self.excluded.insert(path);
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.contains(path)
    }

    /// Every regular file under `root`, in traversal order.
    ///
    /// A root that is itself a file yields just that file. A root that does
    /// not exist (or is neither file nor directory) fails with
    /// [`PsyncError::NotFileOrDirectory`].
    pub fn list(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let not_found = || PsyncError::NotFileOrDirectory {
            path: root.to_path_buf(),
        };
        let meta = fs::metadata(root).map_err(|_| not_found())?;
        if meta.is_file() {
            return Ok(vec![root.to_path_buf()]);
        }
        if !meta.is_dir() {
            return Err(not_found());
        }

        let mut files = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            self.scan_directory(&dir, &mut stack, &mut files);
        }
        debug!(root = %root.display(), files = files.len(), "directory listed");
        Ok(files)
    }

    fn scan_directory(&self, dir: &Path, stack: &mut Vec<PathBuf>, files: &mut Vec<PathBuf>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "skipping unreadable directory");
                return;
            }
        };

        // Children are pushed in reverse so they pop in listing order.
        let mut subdirs = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else {
                continue;
            };
            let path = entry.path();
            let Ok(ft) = entry.file_type() else {
                continue;
            };

            if ft.is_dir() {
                subdirs.push(path);
                continue;
            }

            let is_file = if ft.is_symlink() {
                fs::metadata(&path).is_ok_and(|m| m.is_file())
            } else {
                ft.is_file()
            };
            if is_file && !self.is_excluded(&path) {
                files.push(path);
            }
        }
        stack.extend(subdirs.into_iter().rev());
    }
}
