//! Core types: errors, configuration, path keying.

pub mod config;
pub mod errors;
pub mod paths;
