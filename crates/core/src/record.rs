//! Local task records as held by the local task store.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::id::{IdentityField, LocalId, Source};
use crate::task::{CanonicalTask, Priority};

/// Lifecycle status of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Open
    Pending,
    /// Open but hidden until its wait date
    Waiting,
    /// Done
    Completed,
}

impl TaskStatus {
    /// Store status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Completed => "completed",
        }
    }

    /// Pending or waiting.
    pub fn is_open(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Waiting)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as it exists in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTaskRecord {
    /// Store-assigned id
    pub local_id: LocalId,

    /// Title
    pub description: String,

    /// Current status
    pub status: TaskStatus,

    /// Source the record was imported from
    pub source: Option<Source>,

    /// Things 3 identity value
    pub things3_uuid: Option<String>,

    /// Asana identity value
    pub asana_gid: Option<String>,

    /// Completion already pushed to Things 3
    pub things3_synced: bool,

    /// Completion already pushed to Asana
    pub asana_synced: bool,

    /// Tags as stored
    pub tags: BTreeSet<String>,

    /// Project
    pub project: Option<String>,

    /// Due date
    pub due: Option<NaiveDate>,

    /// Priority
    pub priority: Option<Priority>,

    /// Annotation texts
    pub annotations: Vec<String>,

    /// Records this one depends on
    pub depends: BTreeSet<LocalId>,
}

impl LocalTaskRecord {
    /// Empty pending record; mainly for stores and tests to fill in.
    pub fn new(local_id: LocalId, description: impl Into<String>) -> Self {
        Self {
            local_id,
            description: description.into(),
            status: TaskStatus::Pending,
            source: None,
            things3_uuid: None,
            asana_gid: None,
            things3_synced: false,
            asana_synced: false,
            tags: BTreeSet::new(),
            project: None,
            due: None,
            priority: None,
            annotations: Vec::new(),
            depends: BTreeSet::new(),
        }
    }

    /// Record mirroring a canonical task, as a store would create it.
    pub fn from_canonical(local_id: LocalId, task: &CanonicalTask) -> Self {
        let mut record = Self::new(local_id, task.description.clone());
        record.source = Some(task.source);
        record.set_identity(task.identity.field, Some(task.identity.value.clone()));
        record.tags = task.tags.clone();
        record.project = task.project.clone();
        record.due = task.due;
        record.priority = task.priority;
        record
    }

    /// Identity value carried in `field`, if any.
    pub fn identity(&self, field: IdentityField) -> Option<&str> {
        match field {
            IdentityField::Things3Uuid => self.things3_uuid.as_deref(),
            IdentityField::AsanaGid => self.asana_gid.as_deref(),
        }
    }

    /// Set or clear the identity value for `field`.
    pub fn set_identity(&mut self, field: IdentityField, value: Option<String>) {
        match field {
            IdentityField::Things3Uuid => self.things3_uuid = value,
            IdentityField::AsanaGid => self.asana_gid = value,
        }
    }

    /// Whether the completion was already pushed to the source owning `field`.
    pub fn is_synced(&self, field: IdentityField) -> bool {
        match field {
            IdentityField::Things3Uuid => self.things3_synced,
            IdentityField::AsanaGid => self.asana_synced,
        }
    }

    /// Set the synced flag for `field`.
    pub fn set_synced(&mut self, field: IdentityField, synced: bool) {
        match field {
            IdentityField::Things3Uuid => self.things3_synced = synced,
            IdentityField::AsanaGid => self.asana_synced = synced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskBuilder;

    #[test]
    fn test_from_canonical_mirrors_fields() {
        let task = TaskBuilder::new(Source::Things3, "u-1", "Fix login bug")
            .project(Some("Work"))
            .due(NaiveDate::from_ymd_opt(2025, 6, 1))
            .build()
            .unwrap();

        let record = LocalTaskRecord::from_canonical(LocalId::new("l-1"), &task);
        assert_eq!(record.identity(IdentityField::Things3Uuid), Some("u-1"));
        assert_eq!(record.identity(IdentityField::AsanaGid), None);
        assert_eq!(record.project.as_deref(), Some("Work"));
        assert!(record.status.is_open());
        assert!(!record.is_synced(IdentityField::Things3Uuid));
    }

    #[test]
    fn test_synced_flags_are_per_source() {
        let mut record = LocalTaskRecord::new(LocalId::new("l-2"), "x");
        record.set_synced(IdentityField::AsanaGid, true);
        assert!(record.is_synced(IdentityField::AsanaGid));
        assert!(!record.is_synced(IdentityField::Things3Uuid));
    }
}
