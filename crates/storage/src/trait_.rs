//! Local task store abstraction.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use todosync_core::{
    CanonicalTask, ExternalIdentity, IdentityField, LocalId, LocalTaskRecord, Priority, Source,
    TaskStatus,
};

/// Error type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error (spawning the store process, reading files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store command exited unsuccessfully
    #[error("`{command}` failed ({status}): {stderr}")]
    Command {
        /// Subcommand that failed
        command: String,
        /// Exit status
        status: String,
        /// Captured stderr
        stderr: String,
    },

    /// Store output could not be understood
    #[error("Unexpected store output: {0}")]
    Parse(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Fields for a record the store should create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Title
    pub description: String,
    /// External identity attribute
    pub identity: ExternalIdentity,
    /// Source attribute
    pub source: Source,
    /// Tags (already normalized)
    pub tags: BTreeSet<String>,
    /// Project
    pub project: Option<String>,
    /// Due date
    pub due: Option<NaiveDate>,
    /// Priority
    pub priority: Option<Priority>,
}

impl From<&CanonicalTask> for NewTask {
    fn from(task: &CanonicalTask) -> Self {
        Self {
            description: task.description.clone(),
            identity: task.identity.clone(),
            source: task.source,
            tags: task.tags.clone(),
            project: task.project.clone(),
            due: task.due,
            priority: task.priority,
        }
    }
}

/// A single field mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    /// Replace the title
    Description(String),
    /// Set the project
    Project(String),
    /// Set the due date
    Due(NaiveDate),
    /// Set the priority
    Priority(Priority),
    /// Adjust the tag set
    Tags {
        /// Tags to add
        added: BTreeSet<String>,
        /// Tags to remove
        removed: BTreeSet<String>,
    },
}

impl FieldChange {
    /// Name of the field this change touches.
    pub fn field_name(&self) -> &'static str {
        match self {
            FieldChange::Description(_) => "description",
            FieldChange::Project(_) => "project",
            FieldChange::Due(_) => "due",
            FieldChange::Priority(_) => "priority",
            FieldChange::Tags { .. } => "tags",
        }
    }
}

/// Local task store used by the reconciliation engine.
///
/// Every mutation is atomic from the store's point of view. Callers drive the
/// store strictly sequentially.
#[async_trait]
pub trait TaskStore: Send + Sync {
    // === Lookups ===

    /// Find the record with `status` whose `field` equals `value`.
    async fn find_by_identity(
        &self,
        field: IdentityField,
        value: &str,
        status: TaskStatus,
    ) -> Result<Option<LocalTaskRecord>>;

    /// Identity values and ids of every pending or waiting record carrying `field`.
    async fn list_pending_by_identity_field(
        &self,
        field: IdentityField,
    ) -> Result<Vec<(String, LocalId)>>;

    /// Every completed record carrying `field`.
    async fn list_completed_by_identity_field(
        &self,
        field: IdentityField,
    ) -> Result<Vec<LocalTaskRecord>>;

    // === Mutations ===

    /// Create a record and return its id.
    async fn create(&mut self, task: &NewTask) -> Result<LocalId>;

    /// Apply field changes to a record.
    async fn modify(&mut self, id: &LocalId, changes: &[FieldChange]) -> Result<()>;

    /// Attach an annotation.
    async fn annotate(&mut self, id: &LocalId, text: &str) -> Result<()>;

    /// Make `dependent` depend on `dependency`. Idempotent.
    async fn set_dependency(&mut self, dependent: &LocalId, dependency: &LocalId) -> Result<()>;

    /// Mark a record completed.
    async fn complete(&mut self, id: &LocalId) -> Result<()>;

    /// Record that the completion was pushed to the source owning `field`.
    async fn mark_synced(&mut self, id: &LocalId, field: IdentityField) -> Result<()>;
}
