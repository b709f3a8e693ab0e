//! Configuration system: TOML file + env var overrides + command-line flags.
//!
//! The resulting [`Config`] is built once at startup and handed by reference to
//! every component; nothing reads configuration from global state.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{PsyncError, Result};
use crate::core::paths::{PathMode, base_name, resolve_absolute_path};
use crate::manifest::BackendKind;
use crate::scanner::hasher::{DEFAULT_CHUNK_SIZE, HashAlgorithm};

/// Smallest accepted read chunk for hashing.
pub const MIN_CHUNK_SIZE: usize = 16 * 1024 * 1024;
/// Largest accepted read chunk for hashing.
pub const MAX_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Full psync configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub manifest: ManifestConfig,
    pub mirror: MirrorConfig,
    pub output: OutputConfig,
}

/// What to hash and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    pub source_root: PathBuf,
    pub algorithm: HashAlgorithm,
    pub chunk_size_bytes: usize,
    pub path_mode: PathMode,
}

/// Where and how the manifest is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ManifestConfig {
    pub backend: BackendKind,
    /// Explicit manifest location; derived from the source root when unset.
    pub path: Option<PathBuf>,
    /// Linear rename scan for the text backend (slow on large manifests).
    pub text_rename_scan: bool,
}

/// Optional backup mirror.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct MirrorConfig {
    pub target: Option<PathBuf>,
    /// Ask before touching the mirror.
    pub confirm: bool,
}

/// Output verbosity and journaling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    pub verbose: bool,
    /// Print only the list of changed files.
    pub list_only: bool,
    pub json: bool,
    pub color: bool,
    pub journal_path: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::new(),
            algorithm: HashAlgorithm::default(),
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            path_mode: PathMode::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            list_only: false,
            json: false,
            color: true,
            journal_path: None,
        }
    }
}

impl Config {
    /// Default configuration path (`~/.config/psync/config.toml`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        let home_dir = env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
        home_dir.join(".config").join("psync").join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// A missing file is only an error when the path was given explicitly.
    /// Validation is left to the caller so command-line flags can be layered
    /// on top first.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| PsyncError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str(&raw)?
        } else if path.is_some() {
            return Err(PsyncError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides_from(env_var)?;
        Ok(cfg)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("PSYNC_SOURCE_ROOT") {
            self.scan.source_root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("PSYNC_ALGORITHM") {
            self.scan.algorithm = raw.parse()?;
        }
        if let Some(raw) = lookup("PSYNC_CHUNK_SIZE_BYTES") {
            self.scan.chunk_size_bytes = parse_env("PSYNC_CHUNK_SIZE_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("PSYNC_PATH_MODE") {
            self.scan.path_mode = match raw.trim().to_ascii_lowercase().as_str() {
                "relative" => PathMode::Relative,
                "absolute" => PathMode::Absolute,
                other => return Err(env_error("PSYNC_PATH_MODE", other, "relative|absolute")),
            };
        }
        if let Some(raw) = lookup("PSYNC_BACKEND") {
            self.manifest.backend = match raw.trim().to_ascii_lowercase().as_str() {
                "sqlite" => BackendKind::Sqlite,
                "text" => BackendKind::Text,
                other => return Err(env_error("PSYNC_BACKEND", other, "sqlite|text")),
            };
        }
        if let Some(raw) = lookup("PSYNC_MANIFEST_PATH") {
            self.manifest.path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("PSYNC_TEXT_RENAME_SCAN") {
            self.manifest.text_rename_scan = parse_env("PSYNC_TEXT_RENAME_SCAN", &raw)?;
        }
        if let Some(raw) = lookup("PSYNC_MIRROR_TARGET") {
            self.mirror.target = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("PSYNC_MIRROR_CONFIRM") {
            self.mirror.confirm = parse_env("PSYNC_MIRROR_CONFIRM", &raw)?;
        }
        if let Some(raw) = lookup("PSYNC_VERBOSE") {
            self.output.verbose = parse_env("PSYNC_VERBOSE", &raw)?;
        }
        if let Some(raw) = lookup("PSYNC_JOURNAL_PATH") {
            self.output.journal_path = Some(PathBuf::from(raw));
        }
        Ok(())
    }

    /// Make the source root and mirror target absolute.
    pub fn normalize_paths(&mut self) {
        if !self.scan.source_root.as_os_str().is_empty() {
            self.scan.source_root = resolve_absolute_path(&self.scan.source_root);
        }
        if let Some(target) = self.mirror.target.as_mut() {
            *target = resolve_absolute_path(target);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan.source_root.as_os_str().is_empty() {
            return Err(PsyncError::InvalidConfig {
                details: "scan.source_root must be set".to_string(),
            });
        }

        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.scan.chunk_size_bytes) {
            return Err(PsyncError::InvalidConfig {
                details: format!(
                    "scan.chunk_size_bytes must be in [{MIN_CHUNK_SIZE}, {MAX_CHUNK_SIZE}], got {}",
                    self.scan.chunk_size_bytes
                ),
            });
        }

        if let Some(target) = &self.mirror.target
            && target.starts_with(&self.scan.source_root)
        {
            return Err(PsyncError::InvalidConfig {
                details: format!(
                    "mirror.target {} must not be inside the source root {}",
                    target.display(),
                    self.scan.source_root.display()
                ),
            });
        }

        Ok(())
    }

    /// Manifest location: the configured path, or `<source name>_hash.db|.txt`
    /// in the working directory.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest.path.clone().unwrap_or_else(|| {
            PathBuf::from(format!(
                "{}_hash.{}",
                base_name(&self.scan.source_root),
                self.manifest.backend.default_extension()
            ))
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| PsyncError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn env_error(name: &str, raw: &str, expected: &str) -> PsyncError {
    PsyncError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: expected {expected}"),
    }
}
