//! Sync layer - reconciliation, stale detection, dependency linking and
//! completion push.

#![warn(missing_docs)]

pub mod reconciler;
pub mod stale;
pub mod dependency;
pub mod pusher;
pub mod engine;

use std::fmt;

pub use reconciler::{diff, IdentityIndex, Reconciler, UpsertAction, UpsertOutcome};
pub use stale::{StaleDetector, StaleReport};
pub use dependency::DependencyLinker;
pub use pusher::{CompletionPusher, PushReport, DEFAULT_PUSH_DELAY};
pub use engine::{SyncConfig, SyncEngine, SyncReport};

/// Step of a run at which a single task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Creating the local record
    Create,
    /// Updating the local record
    Update,
    /// Attaching notes
    Annotate,
    /// Linking a subtask to its parent
    Link,
    /// Completing a stale local record
    Complete,
    /// Recording a completion as synced
    MarkSynced,
    /// Writing a completion to the source
    Push,
    /// Listing local records
    List,
}

impl Stage {
    /// Short label used in logs and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Create => "create",
            Stage::Update => "update",
            Stage::Annotate => "annotate",
            Stage::Link => "link",
            Stage::Complete => "complete",
            Stage::MarkSynced => "mark synced",
            Stage::Push => "push",
            Stage::List => "list",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure isolated to one task; the run carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} failed for {identity}: {message}")]
pub struct TaskError {
    /// External identity value (or field name for listing failures)
    pub identity: String,
    /// Where it failed
    pub stage: Stage,
    /// Underlying error, rendered
    pub message: String,
}

impl TaskError {
    /// Build from any displayable error.
    pub fn new(identity: impl Into<String>, stage: Stage, error: impl fmt::Display) -> Self {
        Self {
            identity: identity.into(),
            stage,
            message: error.to_string(),
        }
    }
}
