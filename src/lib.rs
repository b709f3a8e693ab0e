#![forbid(unsafe_code)]

//! psync — hash-based change detection for directory trees.
//!
//! Each run lists a source tree, digests every file, and classifies it against
//! the manifest saved by the previous run (unchanged, new, modified, deleted,
//! renamed). The updated manifest is committed atomically, and the changes can
//! then be mirrored to a backup directory.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use psync::prelude::*;
//!
//! # fn main() -> psync::core::errors::Result<()> {
//! let mut config = Config::default();
//! config.scan.source_root = "/data/photos".into();
//! config.validate()?;
//!
//! let outcome = Pipeline::new(&config).sync(&mut SilentObserver)?;
//! println!("{}", outcome.report);
//! # Ok(())
//! # }
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use psync::manifest::text::TextManifest;
//! use psync::scanner::walker::TreeScanner;
//! ```

pub mod prelude;

pub mod core;
pub mod engine;
pub mod logger;
pub mod manifest;
pub mod scanner;
