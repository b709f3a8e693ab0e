//! Top-level CLI definition and dispatch.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use colored::{Colorize, control};
use serde_json::Value;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use psync::core::config::Config;
use psync::core::errors::PsyncError;
use psync::core::paths::PathMode;
use psync::engine::diff::{ChangeKind, FileEvent};
use psync::engine::pipeline::{Pipeline, RunObserver};
use psync::engine::reconcile::{ConfirmPrompt, LinePrompt, MirrorAction};
use psync::manifest::BackendKind;
use psync::scanner::hasher::HashAlgorithm;

/// psync — detect changes in a directory tree and mirror them to a backup.
#[derive(Debug, Parser)]
#[command(
    name = "psync",
    author,
    version,
    about = "Hash-based change detection and backup mirroring",
    long_about = None
)]
pub struct Cli {
    /// Source directory (or single file) to check.
    #[arg(short = 'd', long = "source", value_name = "DIR")]
    source: Option<PathBuf>,
    /// Mirror directory receiving new and modified files.
    #[arg(short = 't', long = "target", value_name = "DIR")]
    target: Option<PathBuf>,
    /// Digest algorithm: md5, sha1, sha256 (default) or sha512.
    #[arg(short = 'a', long = "algorithm", value_name = "ALGORITHM")]
    algorithm: Option<String>,
    /// Ask before copying to or deleting from the mirror.
    #[arg(short = 'c', long = "confirm")]
    confirm: bool,
    /// Where to save hashes.
    #[arg(short = 's', long = "save-hashes", value_name = "PATH")]
    save_hashes: Option<PathBuf>,
    /// Print every file, including unchanged ones.
    #[arg(short, long)]
    verbose: bool,
    /// Keep hashes in a plain text file instead of an SQLite database.
    #[arg(long)]
    no_sql: bool,
    /// Detect renames with the text manifest (scans the whole manifest per new file).
    #[arg(long)]
    allow_rename: bool,
    /// Store absolute file paths in the manifest.
    #[arg(long)]
    abs: bool,
    /// Print just the list of changed files.
    #[arg(long)]
    no_info: bool,
    /// Print the run report as JSON.
    #[arg(long)]
    json: bool,
    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
    /// Append a JSONL journal of this run.
    #[arg(long, value_name = "PATH")]
    journal: Option<PathBuf>,
    /// Override config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Layer command-line flags over the file/env configuration.
    fn apply_to(&self, config: &mut Config) -> psync::core::errors::Result<()> {
        if let Some(source) = &self.source {
            config.scan.source_root.clone_from(source);
        }
        if let Some(target) = &self.target {
            config.mirror.target = Some(target.clone());
        }
        if let Some(algorithm) = &self.algorithm {
            config.scan.algorithm = algorithm.parse::<HashAlgorithm>()?;
        }
        if let Some(path) = &self.save_hashes {
            config.manifest.path = Some(path.clone());
        }
        if let Some(path) = &self.journal {
            config.output.journal_path = Some(path.clone());
        }
        if self.no_sql {
            config.manifest.backend = BackendKind::Text;
        }
        if self.abs {
            config.scan.path_mode = PathMode::Absolute;
        }
        config.mirror.confirm |= self.confirm;
        config.manifest.text_rename_scan |= self.allow_rename;
        config.output.verbose |= self.verbose;
        config.output.list_only |= self.no_info;
        config.output.json |= self.json;
        if self.no_color {
            config.output.color = false;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input.
    #[error("{0}")]
    User(String),
    /// Failure reported by the engine.
    #[error(transparent)]
    Core(#[from] PsyncError),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// Install the stderr diagnostics subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "psync=debug" } else { "psync=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Resolve configuration, run the sync, then reconcile the mirror.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_to(&mut config)?;
    if config.scan.source_root.as_os_str().is_empty() {
        return Err(CliError::User(
            "no source directory given (use -d <DIR>, see --help)".to_string(),
        ));
    }
    config.normalize_paths();
    config.validate()?;

    init_tracing(config.output.verbose);
    if !config.output.color {
        control::set_override(false);
    }

    let mode = output_mode(&config);
    let mut observer = TerminalObserver::new(&config, mode);
    let mut pipeline = Pipeline::new(&config);

    let mut outcome = pipeline.sync(&mut observer)?;
    if mode == OutputMode::Human {
        for line in outcome.report.summary_lines(config.output.list_only) {
            println!("{line}");
        }
    }

    let mut prompt: Option<Box<dyn ConfirmPrompt>> = match (config.mirror.confirm, mode) {
        (false, _) => None,
        (true, OutputMode::Human) => Some(Box::new(LinePrompt::stdio())),
        (true, OutputMode::Json) => Some(Box::new(LinePrompt::new(io::stdin().lock(), io::stderr()))),
    };
    let prompt = prompt
        .as_mut()
        .map(|p| &mut **p as &mut dyn ConfirmPrompt);
    let mirror = pipeline.reconcile(&mut outcome, prompt, &mut observer)?;

    match mode {
        OutputMode::Human => {
            if mirror.as_ref().is_some_and(|m| m.declined) {
                println!("Ok, by then");
                return Ok(());
            }
            if let Some(mirror) = &mirror
                && mirror.failed > 0
            {
                eprintln!(
                    "{} {} mirror operation(s) failed",
                    "warning:".yellow().bold(),
                    mirror.failed
                );
            }
            if !config.output.list_only {
                println!("Done");
            }
        }
        OutputMode::Json => {
            let payload = serde_json::to_value(&outcome)?;
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

/// Prints per-file lines and progress chatter for a human reader.
struct TerminalObserver {
    mode: OutputMode,
    verbose: bool,
    list_only: bool,
}

impl TerminalObserver {
    fn new(config: &Config, mode: OutputMode) -> Self {
        Self {
            mode,
            verbose: config.output.verbose,
            list_only: config.output.list_only,
        }
    }
}

impl RunObserver for TerminalObserver {
    fn progress(&mut self, message: &str) {
        if self.mode == OutputMode::Human && !self.list_only {
            println!("{message}");
        }
    }

    fn file_event(&mut self, event: &FileEvent<'_>) {
        if self.mode == OutputMode::Json {
            return;
        }
        if matches!(event.kind, ChangeKind::Unchanged | ChangeKind::Indexed) && !self.verbose {
            return;
        }
        let label = event.kind.label();
        let label = match event.kind {
            ChangeKind::New => label.green(),
            ChangeKind::Modified => label.yellow(),
            ChangeKind::Deleted => label.red(),
            ChangeKind::Renamed => label.cyan(),
            ChangeKind::Indexed | ChangeKind::Unchanged => label.normal(),
        };
        match event.from {
            Some(from) => println!("{label} {from} to {}", event.path),
            None => println!("{label} {}", event.path),
        }
    }

    fn mirror_action(&mut self, action: &MirrorAction<'_>) {
        if self.mode == OutputMode::Json || !self.verbose {
            return;
        }
        match action {
            MirrorAction::CreateDir { path } => println!("Creating directory \"{}\"", path.display()),
            MirrorAction::Copy { from, to } => {
                println!("Copying \"{}\" to \"{}\"", from.display(), to.display());
            }
            MirrorAction::Remove { path } => println!("Deleting \"{}\"", path.display()),
            MirrorAction::Skip { key, reason } => println!("Skipping \"{key}\" ({reason})"),
            MirrorAction::Fail { .. } => {}
        }
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(config: &Config) -> OutputMode {
    let env_mode = std::env::var("PSYNC_OUTPUT_FORMAT").ok();
    resolve_output_mode(config.output.json, env_mode.as_deref())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }
    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        _ => OutputMode::Human,
    }
}
