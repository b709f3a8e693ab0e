//! Change detection and mirroring.

pub mod diff;
pub mod pipeline;
pub mod reconcile;
pub mod report;
