//! Hierarchical, cited biography document.
//!
//! The tree is a pure hierarchy: sections reference memories by opaque id
//! only, numbered titles define sibling order, and the citation list of a
//! section is an append-only audit trail. All mutating operations serialize
//! on a tree-wide write guard; snapshots wait for pending writes to drain so
//! a save never captures a partial mutation.

mod section;
mod tree;

pub mod paths;

pub use paths::{SectionOutline, validate_path_format, validate_plan_target};
pub use section::{Section, extract_citations};
pub use tree::{Biography, SectionRef};

use thiserror::Error;

/// Structured rejection of an operation that would violate a tree
/// invariant. These return to the calling agent, which may revise and
/// retry; they never abort the session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BiographyError {
    #[error("invalid path format: {path} ({reason})")]
    InvalidPath { path: String, reason: String },
    #[error("non-sequential numbering: {path} requires sibling {missing} to exist first")]
    NonSequentialNumbering { path: String, missing: u32 },
    #[error("section not found: {0}")]
    MissingSection(String),
    #[error("cannot delete the root section")]
    CannotDeleteRoot,
    #[error("path {path} does not end with title {title}")]
    ConflictingLocator { path: String, title: String },
    #[error("timed out waiting for pending writes to complete")]
    PendingWritesTimeout,
}
