//! Integration tests: full-pipeline scenarios against both manifest backends,
//! and CLI smoke tests through the compiled binary.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use psync::core::config::Config;
use psync::engine::diff::RunMode;
use psync::engine::pipeline::{Pipeline, RunOutcome, SilentObserver};
use psync::engine::reconcile::ConfirmPrompt;
use psync::manifest::{BackendKind, open_store};
use tempfile::TempDir;

const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

struct Scenario {
    _tmp: TempDir,
    root: PathBuf,
    mirror: PathBuf,
    config: Config,
}

impl Scenario {
    fn new(backend: BackendKind) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("source");
        let mirror = tmp.path().join("mirror");
        fs::create_dir_all(&root).unwrap();

        let mut config = Config::default();
        config.scan.source_root = root.clone();
        config.manifest.backend = backend;
        config.manifest.text_rename_scan = true;
        config.manifest.path = Some(tmp.path().join(format!(
            "source_hash.{}",
            backend.default_extension()
        )));
        config.validate().unwrap();
        Self {
            _tmp: tmp,
            root,
            mirror,
            config,
        }
    }

    fn with_mirror(mut self) -> Self {
        self.config.mirror.target = Some(self.mirror.clone());
        self
    }

    fn manifest_path(&self) -> PathBuf {
        self.config.manifest_path()
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn remove(&self, rel: &str) {
        fs::remove_file(self.root.join(rel)).unwrap();
    }

    fn run(&self) -> RunOutcome {
        let mut pipeline = Pipeline::new(&self.config);
        let mut outcome = pipeline.sync(&mut SilentObserver).unwrap();
        pipeline
            .reconcile(&mut outcome, None, &mut SilentObserver)
            .unwrap();
        outcome
    }

    /// Reload the committed manifest and return `(path, digest)` pairs, sorted.
    fn manifest_entries(&self) -> Vec<(String, String)> {
        let mut store = open_store(&self.config).unwrap();
        assert!(store.load().unwrap(), "manifest should exist");
        let mut entries: Vec<_> = store
            .unfound_entries()
            .unwrap()
            .into_iter()
            .map(|e| (e.path, e.digest))
            .collect();
        entries.sort();
        entries
    }
}

fn both_backends() -> [BackendKind; 2] {
    [BackendKind::Sqlite, BackendKind::Text]
}

#[test]
fn empty_directory_first_run() {
    for backend in both_backends() {
        let sc = Scenario::new(backend);
        let outcome = sc.run();
        assert_eq!(outcome.changes.mode, RunMode::FirstIndex);
        assert_eq!(outcome.report.to_string(), "First indexing completed");
        assert!(sc.manifest_path().exists(), "{backend:?}: manifest created");
        assert!(sc.manifest_entries().is_empty());
    }
}

#[test]
fn hello_file_gets_known_sha256() {
    for backend in both_backends() {
        let sc = Scenario::new(backend);
        sc.write("a.txt", "hello");
        let outcome = sc.run();
        assert_eq!(outcome.changes.new.len(), 1);
        assert_eq!(
            sc.manifest_entries(),
            vec![("a.txt".to_string(), HELLO_SHA256.to_string())]
        );
    }
}

#[test]
fn second_run_without_changes_is_idempotent() {
    for backend in both_backends() {
        let sc = Scenario::new(backend);
        sc.write("a.txt", "hello");
        sc.write("nested/deeper/b.bin", "bytes");
        sc.run();
        let before = sc.manifest_entries();

        let outcome = sc.run();
        assert!(outcome.changes.is_empty(), "{backend:?}");
        assert_eq!(outcome.changes.unchanged, 2);
        assert_eq!(outcome.report.to_string(), "No modifications made");
        assert_eq!(sc.manifest_entries(), before);
    }
}

#[test]
fn changed_content_is_modified() {
    for backend in both_backends() {
        let sc = Scenario::new(backend);
        sc.write("a.txt", "hello");
        sc.run();

        sc.write("a.txt", "hello2");
        let outcome = sc.run();
        assert_eq!(outcome.changes.modified.len(), 1, "{backend:?}");
        assert!(outcome.changes.new.is_empty());
        assert!(outcome.changes.deleted.is_empty());
        let entries = sc.manifest_entries();
        assert_eq!(entries.len(), 1);
        assert_ne!(entries[0].1, HELLO_SHA256);
        assert_eq!(
            outcome.report.to_string(),
            "0 files added, 1 changed, deleted 0, renamed 0"
        );
    }
}

#[test]
fn unique_content_move_is_renamed() {
    for backend in both_backends() {
        let sc = Scenario::new(backend);
        sc.write("a.txt", "unique payload");
        sc.write("other.txt", "something else");
        sc.run();

        fs::rename(sc.root.join("a.txt"), sc.root.join("b.txt")).unwrap();
        let outcome = sc.run();
        assert_eq!(
            outcome.changes.renamed.get("a.txt").map(String::as_str),
            Some("b.txt"),
            "{backend:?}"
        );
        assert!(outcome.changes.new.is_empty());
        assert!(outcome.changes.deleted.is_empty());
        let keys: Vec<_> = sc.manifest_entries().into_iter().map(|(p, _)| p).collect();
        assert_eq!(keys, vec!["b.txt", "other.txt"]);
    }
}

#[test]
fn ambiguous_content_is_not_a_rename() {
    for backend in both_backends() {
        let sc = Scenario::new(backend);
        sc.write("a.txt", "D");
        sc.write("b.txt", "D");
        sc.run();

        sc.remove("a.txt");
        sc.write("c.txt", "D");
        let outcome = sc.run();
        assert!(outcome.changes.renamed.is_empty(), "{backend:?}");
        assert_eq!(outcome.changes.new[0].path, "c.txt");
        assert_eq!(outcome.changes.deleted[0].path, "a.txt");
    }
}

#[test]
fn removed_file_is_deleted_and_dropped() {
    for backend in both_backends() {
        let sc = Scenario::new(backend);
        sc.write("keep.txt", "k");
        sc.write("drop.txt", "d");
        sc.run();

        sc.remove("drop.txt");
        let outcome = sc.run();
        assert_eq!(outcome.changes.deleted.len(), 1, "{backend:?}");
        let keys: Vec<_> = sc.manifest_entries().into_iter().map(|(p, _)| p).collect();
        assert_eq!(keys, vec!["keep.txt"]);
    }
}

#[test]
fn uncommitted_run_leaves_manifest_untouched() {
    for backend in both_backends() {
        let sc = Scenario::new(backend);
        sc.write("a.txt", "hello");
        sc.run();
        let before = fs::read(sc.manifest_path()).unwrap();

        {
            // Simulate a crash between scanning and commit.
            let mut store = open_store(&sc.config).unwrap();
            assert!(store.load().unwrap());
            store.upsert("a.txt", "ffff", 42).unwrap();
            store.upsert("ghost.txt", "eeee", 42).unwrap();
        }

        assert_eq!(fs::read(sc.manifest_path()).unwrap(), before, "{backend:?}");
        assert_eq!(
            sc.manifest_entries(),
            vec![("a.txt".to_string(), HELLO_SHA256.to_string())]
        );
    }
}

#[test]
fn corrupt_manifest_aborts_before_scanning() {
    let sc = Scenario::new(BackendKind::Sqlite);
    sc.write("a.txt", "hello");
    fs::write(sc.manifest_path(), b"not a database at all, just text").unwrap();

    let err = Pipeline::new(&sc.config)
        .sync(&mut SilentObserver)
        .unwrap_err();
    assert_eq!(err.code(), "PSY-2101");
    assert!(!err.is_recoverable());
}

#[test]
fn malformed_text_lines_are_skipped() {
    let sc = Scenario::new(BackendKind::Text);
    sc.write("a.txt", "hello");
    fs::write(
        sc.manifest_path(),
        format!("{HELLO_SHA256} a.txt\nthis-line-has-no-separator\n"),
    )
    .unwrap();

    let outcome = sc.run();
    assert!(outcome.changes.is_empty());
    assert_eq!(outcome.report.baseline_entries, 1);
}

#[test]
fn mirror_follows_new_modified_and_deleted() {
    for backend in both_backends() {
        let sc = Scenario::new(backend).with_mirror();
        sc.write("a.txt", "one");
        sc.write("dir/b.txt", "two");
        sc.run();
        assert_eq!(fs::read_to_string(sc.mirror.join("dir/b.txt")).unwrap(), "two");

        sc.write("a.txt", "one, edited");
        sc.remove("dir/b.txt");
        sc.write("dir/c.txt", "three");
        let outcome = sc.run();

        let mirror = outcome.report.mirror.clone().unwrap();
        assert_eq!(mirror.copied, 2, "{backend:?}");
        assert_eq!(mirror.removed, 1);
        assert_eq!(fs::read_to_string(sc.mirror.join("a.txt")).unwrap(), "one, edited");
        assert!(!sc.mirror.join("dir/b.txt").exists());
        assert!(sc.mirror.join("dir/c.txt").exists());
    }
}

struct Decline;

impl ConfirmPrompt for Decline {
    fn confirm(&mut self, _question: &str) -> std::io::Result<bool> {
        Ok(false)
    }
}

#[test]
fn declined_confirmation_keeps_commit_and_skips_mirror() {
    let mut sc = Scenario::new(BackendKind::Sqlite).with_mirror();
    sc.config.mirror.confirm = true;
    sc.write("a.txt", "hello");

    let mut pipeline = Pipeline::new(&sc.config);
    let mut outcome = pipeline.sync(&mut SilentObserver).unwrap();
    let mirror = pipeline
        .reconcile(&mut outcome, Some(&mut Decline), &mut SilentObserver)
        .unwrap()
        .unwrap();
    assert!(mirror.declined);
    assert!(!sc.mirror.join("a.txt").exists());
    assert_eq!(sc.manifest_entries().len(), 1);
}

#[test]
fn absolute_mode_keys_are_full_paths() {
    let mut sc = Scenario::new(BackendKind::Text).with_mirror();
    sc.config.scan.path_mode = psync::core::paths::PathMode::Absolute;
    sc.write("x/y.txt", "abs");
    sc.run();

    let key = sc.root.join("x").join("y.txt");
    assert_eq!(sc.manifest_entries()[0].0, key.to_string_lossy());
    assert_eq!(fs::read_to_string(sc.mirror.join("x").join("y.txt")).unwrap(), "abs");
}

// ──────────────────── CLI ────────────────────

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("Usage"));
    assert!(result.stdout.contains("--no-sql"));
}

#[test]
fn version_flag_prints_version() {
    let result = common::run_cli_case("version_flag_prints_version", &["-V"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_source_exits_nonzero() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope");
    let result = common::run_cli_case_in(
        "missing_source_exits_nonzero",
        &["-d", missing.to_str().unwrap()],
        Some(tmp.path()),
        None,
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("psync: [PSY-2001]"));
}

#[test]
fn unknown_algorithm_exits_nonzero() {
    let tmp = TempDir::new().unwrap();
    let result = common::run_cli_case_in(
        "unknown_algorithm_exits_nonzero",
        &["-d", tmp.path().to_str().unwrap(), "-a", "whirlpool"],
        Some(tmp.path()),
        None,
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("PSY-1101"));
}

fn cli_tree() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("photos");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.txt"), "hello").unwrap();
    (tmp, src)
}

#[test]
fn cli_first_run_then_change_report() {
    let (tmp, src) = cli_tree();
    let src_arg = src.to_str().unwrap();

    let first = common::run_cli_case_in("cli_first_run", &["-d", src_arg, "--no-color"], Some(tmp.path()), None);
    assert!(first.status.success(), "log: {}", first.log_path.display());
    assert!(first.stdout.contains("Listing directory"));
    assert!(first.stdout.contains("Found 1 files"));
    assert!(first.stdout.contains("First indexing completed"));
    assert!(first.stdout.trim_end().ends_with("Done"));
    assert!(tmp.path().join("photos_hash.db").exists());

    fs::write(src.join("new.txt"), "fresh").unwrap();
    let second = common::run_cli_case_in(
        "cli_second_run",
        &["-d", src_arg, "--no-color", "--no-info"],
        Some(tmp.path()),
        None,
    );
    assert!(second.status.success(), "log: {}", second.log_path.display());
    assert_eq!(second.stdout.trim(), "NEW new.txt");
}

#[test]
fn cli_text_backend_and_json_output() {
    let (tmp, src) = cli_tree();
    let src_arg = src.to_str().unwrap();

    let result = common::run_cli_case_in(
        "cli_text_backend_and_json_output",
        &["-d", src_arg, "--no-sql", "--json"],
        Some(tmp.path()),
        None,
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(tmp.path().join("photos_hash.txt").exists());
    let json: serde_json::Value = serde_json::from_str(result.stdout.trim()).unwrap();
    assert_eq!(json["report"]["mode"], "first_index");
    assert_eq!(json["report"]["added"], 1);
    assert_eq!(json["changes"]["new"][0]["path"], "a.txt");
}

#[test]
fn cli_confirm_prompt_declined() {
    let (tmp, src) = cli_tree();
    let mirror = tmp.path().join("backup");

    let result = common::run_cli_case_in(
        "cli_confirm_prompt_declined",
        &[
            "-d",
            src.to_str().unwrap(),
            "-t",
            mirror.to_str().unwrap(),
            "-c",
            "--no-color",
        ],
        Some(tmp.path()),
        Some("perhaps\nn\n"),
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert_eq!(result.stdout.matches("y/n").count(), 2);
    assert!(result.stdout.contains("Ok, by then"));
    assert!(!mirror.join("a.txt").exists());
    assert!(tmp.path().join("photos_hash.db").exists());
}

#[test]
fn cli_mirror_confirmed() {
    let (tmp, src) = cli_tree();
    let mirror = tmp.path().join("backup");

    let result = common::run_cli_case_in(
        "cli_mirror_confirmed",
        &["-d", src.to_str().unwrap(), "-t", mirror.to_str().unwrap(), "-c"],
        Some(tmp.path()),
        Some("yes\n"),
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert_eq!(fs::read_to_string(mirror.join("a.txt")).unwrap(), "hello");
}

#[test]
fn cli_rejects_mirror_inside_source() {
    let (tmp, src) = cli_tree();
    let inner = src.join("backup");
    let result = common::run_cli_case_in(
        "cli_rejects_mirror_inside_source",
        &["-d", src.to_str().unwrap(), "-t", inner.to_str().unwrap()],
        Some(tmp.path()),
        None,
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("PSY-1001"));
    assert!(!Path::new(&tmp.path().join("photos_hash.db")).exists());
}
