//! SQLite manifest: a single `hashes` table mutated inside one transaction.
//!
//! `load` opens the transaction and `commit` ends it. If the process dies in
//! between, SQLite rolls the transaction back on next open and the previous
//! run's manifest is intact.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::debug;

use crate::core::errors::{PsyncError, Result};
use crate::manifest::{
    BackendKind, ManifestEntry, ManifestStore, already_committed, not_loaded,
};

/// SQLite-backed manifest store.
pub struct SqliteManifest {
    path: PathBuf,
    conn: Option<Connection>,
    committed: bool,
}

impl SqliteManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: None,
            committed: false,
        }
    }

    fn conn(&self, op: &str) -> Result<&Connection> {
        if self.committed {
            return Err(already_committed(op));
        }
        self.conn.as_ref().ok_or_else(|| not_loaded(op))
    }

    fn open_connection(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| PsyncError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| PsyncError::unreadable(&self.path, e))?;
        apply_pragmas(&conn).map_err(|e| PsyncError::unreadable(&self.path, e))?;
        Ok(conn)
    }

    fn changed_one(&self, op: &str, path: &str, changed: usize) -> Result<()> {
        if changed == 0 {
            return Err(PsyncError::ManifestState {
                details: format!("{op}: no manifest entry for {path}"),
            });
        }
        Ok(())
    }
}

impl ManifestStore for SqliteManifest {
    fn load(&mut self) -> Result<bool> {
        if self.conn.is_some() || self.committed {
            return Err(PsyncError::ManifestState {
                details: "load() called twice".to_string(),
            });
        }

        let prior_bytes = match fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                return Err(PsyncError::unreadable(&self.path, "not a regular file"));
            }
            Err(_) => 0,
        };

        let conn = self.open_connection()?;
        let unreadable = |e: rusqlite::Error| PsyncError::unreadable(&self.path, e);

        conn.execute_batch("BEGIN IMMEDIATE").map_err(unreadable)?;

        // Fails with "file is not a database" for foreign files.
        let has_table: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'hashes')",
                [],
                |row| row.get(0),
            )
            .map_err(unreadable)?;

        let loaded = if has_table {
            conn.prepare("SELECT file, hash, modified, found FROM hashes LIMIT 0")
                .map_err(unreadable)?;
            conn.execute("UPDATE hashes SET found = 0", [])
                .map_err(unreadable)?;
            true
        } else if prior_bytes > 0 {
            return Err(PsyncError::unreadable(
                &self.path,
                "database has no `hashes` table",
            ));
        } else {
            // Empty or absent file: an earlier first run never committed.
            false
        };
        apply_schema(&conn).map_err(unreadable)?;

        debug!(path = %self.path.display(), loaded, "sqlite manifest opened");
        self.conn = Some(conn);
        Ok(loaded)
    }

    fn lookup(&self, path: &str) -> Result<Option<String>> {
        let digest = self
            .conn("lookup")?
            .prepare_cached("SELECT hash FROM hashes WHERE file = ?1")?
            .query_row(params![path], |row| row.get(0))
            .optional()?;
        Ok(digest)
    }

    fn lookup_by_digest(&self, digest: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn("lookup_by_digest")?
            .prepare_cached("SELECT file FROM hashes WHERE hash = ?1 ORDER BY file")?;
        let paths = stmt
            .query_map(params![digest], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    fn upsert(&mut self, path: &str, digest: &str, timestamp: i64) -> Result<()> {
        self.conn("upsert")?
            .prepare_cached(
                "INSERT INTO hashes (file, hash, modified, found) VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(file) DO UPDATE SET
                    hash = excluded.hash,
                    modified = excluded.modified,
                    found = 1",
            )?
            .execute(params![path, digest, timestamp])?;
        Ok(())
    }

    fn mark_found(&mut self, path: &str) -> Result<()> {
        let changed = self
            .conn("mark_found")?
            .prepare_cached("UPDATE hashes SET found = 1 WHERE file = ?1")?
            .execute(params![path])?;
        self.changed_one("mark_found", path, changed)
    }

    fn rename(&mut self, old_path: &str, new_path: &str, timestamp: i64) -> Result<()> {
        let changed = self
            .conn("rename")?
            .prepare_cached("UPDATE hashes SET file = ?1, modified = ?2, found = 1 WHERE file = ?3")?
            .execute(params![new_path, timestamp, old_path])?;
        self.changed_one("rename", old_path, changed)
    }

    fn unfound_entries(&self) -> Result<Vec<ManifestEntry>> {
        let mut stmt = self
            .conn("unfound_entries")?
            .prepare_cached("SELECT file, hash, modified FROM hashes WHERE found = 0 ORDER BY file")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ManifestEntry {
                    path: row.get(0)?,
                    digest: row.get(1)?,
                    last_changed_at: row.get(2)?,
                    found: false,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        self.conn("remove")?
            .prepare_cached("DELETE FROM hashes WHERE file = ?1")?
            .execute(params![path])?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn("commit")?.execute_batch("COMMIT")?;
        self.committed = true;
        self.conn = None;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn("len")?
            .query_row("SELECT COUNT(*) FROM hashes", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    // Rollback journal: the manifest stays a single file between runs.
    conn.execute_batch(
        "PRAGMA journal_mode = DELETE;
         PRAGMA synchronous = FULL;
         PRAGMA busy_timeout = 5000;",
    )
}

fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS hashes (
            file TEXT NOT NULL UNIQUE,
            hash TEXT NOT NULL,
            modified INTEGER NOT NULL DEFAULT 0,
            found INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_hashes_hash ON hashes(hash);",
    )
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const D1: &str = "aaaa";
    const D2: &str = "bbbb";

    fn first_run(dir: &Path) -> SqliteManifest {
        let mut store = SqliteManifest::new(dir.join("hashes.db"));
        assert!(!store.load().unwrap());
        store
    }

    fn reopen(dir: &Path) -> SqliteManifest {
        let mut store = SqliteManifest::new(dir.join("hashes.db"));
        assert!(store.load().unwrap());
        store
    }

    #[test]
    fn first_run_then_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = first_run(tmp.path());
        store.upsert("a.txt", D1, 100).unwrap();
        store.upsert("b.txt", D2, 100).unwrap();
        store.commit().unwrap();

        let store = reopen(tmp.path());
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.lookup("a.txt").unwrap().as_deref(), Some(D1));
        assert!(store.lookup("zzz").unwrap().is_none());
    }

    #[test]
    fn load_resets_found_and_keeps_timestamps() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = first_run(tmp.path());
        store.upsert("a.txt", D1, 100).unwrap();
        store.commit().unwrap();

        let mut store = reopen(tmp.path());
        let unfound = store.unfound_entries().unwrap();
        assert_eq!(unfound.len(), 1);
        assert_eq!(unfound[0].last_changed_at, 100);
        store.mark_found("a.txt").unwrap();
        assert!(store.unfound_entries().unwrap().is_empty());
    }

    #[test]
    fn upsert_overwrites_digest_and_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = first_run(tmp.path());
        store.upsert("a.txt", D1, 100).unwrap();
        store.upsert("a.txt", D2, 200).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.lookup("a.txt").unwrap().as_deref(), Some(D2));
    }

    #[test]
    fn rename_keeps_digest_under_new_key() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = first_run(tmp.path());
        store.upsert("old.txt", D1, 100).unwrap();
        store.commit().unwrap();

        let mut store = reopen(tmp.path());
        store.rename("old.txt", "new.txt", 300).unwrap();
        assert!(store.lookup("old.txt").unwrap().is_none());
        assert_eq!(store.lookup("new.txt").unwrap().as_deref(), Some(D1));
        assert!(store.unfound_entries().unwrap().is_empty());
        assert!(matches!(
            store.rename("ghost", "x", 1),
            Err(PsyncError::ManifestState { .. })
        ));
    }

    #[test]
    fn lookup_by_digest_returns_all_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = first_run(tmp.path());
        store.upsert("b", D1, 1).unwrap();
        store.upsert("a", D1, 1).unwrap();
        store.upsert("c", D2, 1).unwrap();
        assert_eq!(store.lookup_by_digest(D1).unwrap(), vec!["a", "b"]);
        assert!(store.lookup_by_digest("none").unwrap().is_empty());
    }

    #[test]
    fn uncommitted_run_is_rolled_back() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = first_run(tmp.path());
        store.upsert("keep.txt", D1, 100).unwrap();
        store.commit().unwrap();
        let before = fs::read(tmp.path().join("hashes.db")).unwrap();

        {
            let mut store = reopen(tmp.path());
            store.upsert("keep.txt", D2, 200).unwrap();
            store.upsert("extra.txt", D2, 200).unwrap();
            store.remove("keep.txt").unwrap();
            // Dropped without commit.
        }

        let store = reopen(tmp.path());
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.lookup("keep.txt").unwrap().as_deref(), Some(D1));
        drop(store);
        assert_eq!(fs::read(tmp.path().join("hashes.db")).unwrap(), before);
    }

    #[test]
    fn garbage_file_is_unreadable() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("hashes.db"), b"this is definitely not sqlite").unwrap();
        let mut store = SqliteManifest::new(tmp.path().join("hashes.db"));
        assert!(matches!(
            store.load(),
            Err(PsyncError::ManifestUnreadable { .. })
        ));
    }

    #[test]
    fn foreign_database_is_unreadable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hashes.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE other (x INTEGER);")
            .unwrap();
        let mut store = SqliteManifest::new(&path);
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("hashes"), "{err}");
    }

    #[test]
    fn empty_file_counts_as_first_run() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("hashes.db"), b"").unwrap();
        let _ = first_run(tmp.path());
    }

    #[test]
    fn mutations_require_load_and_stop_after_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = SqliteManifest::new(tmp.path().join("hashes.db"));
        assert!(matches!(
            store.upsert("a", D1, 1),
            Err(PsyncError::ManifestState { .. })
        ));
        store.load().unwrap();
        store.commit().unwrap();
        assert!(store.lookup("a").is_err());
        assert!(store.commit().is_err());
    }
}
