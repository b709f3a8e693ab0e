//! Structured run journal (JSONL).

pub mod jsonl;
