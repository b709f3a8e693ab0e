//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use psync::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{PsyncError, Result};
pub use crate::core::paths::PathMode;

// Scanner
pub use crate::scanner::hasher::{ContentHasher, HashAlgorithm};
pub use crate::scanner::walker::TreeScanner;

// Manifest
pub use crate::manifest::{BackendKind, ManifestEntry, ManifestStore, open_store};

// Engine
pub use crate::engine::diff::{ChangeKind, ChangeSet, DiffEngine, FileEvent, RunMode};
pub use crate::engine::pipeline::{Pipeline, RunObserver, RunOutcome, SilentObserver};
pub use crate::engine::reconcile::{ConfirmPrompt, LinePrompt, MirrorOutcome, ReconciliationEngine};
pub use crate::engine::report::SessionReport;
