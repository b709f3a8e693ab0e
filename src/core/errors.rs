//! PSY-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, PsyncError>;

/// Top-level error type for psync.
#[derive(Debug, Error)]
pub enum PsyncError {
    #[error("[PSY-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[PSY-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[PSY-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[PSY-1101] unknown algorithm \"{name}\" (expected md5, sha1, sha256 or sha512)")]
    UnsupportedAlgorithm { name: String },

    #[error("[PSY-1102] manifest backend unavailable: {details}")]
    BackendUnavailable { details: String },

    #[error("[PSY-2001] {path} is not a valid file/directory")]
    NotFileOrDirectory { path: PathBuf },

    #[error("[PSY-2002] file unavailable at {path}: {source}")]
    FileUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[PSY-2101] manifest unreadable at {path}: {details}")]
    ManifestUnreadable { path: PathBuf, details: String },

    #[error("[PSY-2102] wrong formatted manifest line {line_no}: {line}")]
    MalformedManifestLine { line_no: usize, line: String },

    #[error("[PSY-2103] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[PSY-2104] manifest store used out of order: {details}")]
    ManifestState { details: String },

    #[error("[PSY-2201] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[PSY-3001] mirror IO failure at {path}: {source}")]
    MirrorIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[PSY-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PsyncError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "PSY-1001",
            Self::MissingConfig { .. } => "PSY-1002",
            Self::ConfigParse { .. } => "PSY-1003",
            Self::UnsupportedAlgorithm { .. } => "PSY-1101",
            Self::BackendUnavailable { .. } => "PSY-1102",
            Self::NotFileOrDirectory { .. } => "PSY-2001",
            Self::FileUnavailable { .. } => "PSY-2002",
            Self::ManifestUnreadable { .. } => "PSY-2101",
            Self::MalformedManifestLine { .. } => "PSY-2102",
            Self::Sql { .. } => "PSY-2103",
            Self::ManifestState { .. } => "PSY-2104",
            Self::Serialization { .. } => "PSY-2201",
            Self::MirrorIo { .. } => "PSY-3001",
            Self::Io { .. } => "PSY-3002",
        }
    }

    /// Whether the failure is confined to a single file and the run may continue.
    ///
    /// Everything else aborts the run before the manifest is committed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::FileUnavailable { .. }
                | Self::MalformedManifestLine { .. }
                | Self::MirrorIo { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for a corrupt or unopenable manifest.
    #[must_use]
    pub fn unreadable(path: impl AsRef<Path>, details: impl ToString) -> Self {
        Self::ManifestUnreadable {
            path: path.as_ref().to_path_buf(),
            details: details.to_string(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for PsyncError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for PsyncError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for PsyncError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
