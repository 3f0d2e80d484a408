//! todo-sync core data models.
//!
//! This crate defines the canonical task shape produced by every source
//! fetcher and the local record shape held by the local task store.

#![warn(missing_docs)]

// Identities
mod id;

// Tasks
mod task;
mod record;

// Re-exports
pub use id::{ExternalIdentity, IdentityField, LocalId, Source};
pub use task::{
    clean_annotation, normalize_tag, normalize_tags, CanonicalTask, Priority, TaskBuilder,
    MAX_ANNOTATION_CHARS,
};
pub use record::{LocalTaskRecord, TaskStatus};

/// Errors raised while building or parsing core values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A task had no usable title
    #[error("task {0} has an empty description")]
    EmptyDescription(String),

    /// A task had no identity value
    #[error("task has an empty {0}")]
    EmptyIdentity(IdentityField),

    /// Unknown source name
    #[error("unknown source: {0}")]
    UnknownSource(String),
}
