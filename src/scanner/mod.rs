//! File discovery and content hashing.

pub mod hasher;
pub mod walker;
