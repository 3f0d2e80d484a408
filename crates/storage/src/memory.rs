//! In-memory store.
//!
//! Behaves like the Taskwarrior adapter at the `TaskStore` boundary and keeps a
//! log of every mutation so callers can assert on exact payloads. Failures can
//! be injected per operation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use todosync_core::{IdentityField, LocalId, LocalTaskRecord, TaskStatus};
use ulid::Ulid;

use super::{FieldChange, NewTask, Result, StoreError, TaskStore};

/// Store operations, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `find_by_identity`
    Find,
    /// Both listing operations
    List,
    /// `create`
    Create,
    /// `modify`
    Modify,
    /// `annotate`
    Annotate,
    /// `set_dependency`
    SetDependency,
    /// `complete`
    Complete,
    /// `mark_synced`
    MarkSynced,
}

/// A mutation received by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `create`
    Create(NewTask),
    /// `modify`
    Modify(LocalId, Vec<FieldChange>),
    /// `annotate`
    Annotate(LocalId, String),
    /// `set_dependency(dependent, dependency)`
    SetDependency(LocalId, LocalId),
    /// `complete`
    Complete(LocalId),
    /// `mark_synced`
    MarkSynced(LocalId, IdentityField),
}

/// In-memory [`TaskStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<LocalTaskRecord>,
    calls: Vec<StoreCall>,
    // op -> keys (identity value for find/create, local id otherwise); empty set = every call
    failures: HashMap<StoreOp, HashSet<String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record.
    pub fn insert(&mut self, record: LocalTaskRecord) {
        self.records.push(record);
    }

    /// Seed a record with `status` carrying `field = value`; returns its id.
    pub fn insert_with_identity(
        &mut self,
        field: IdentityField,
        value: &str,
        description: &str,
        status: TaskStatus,
    ) -> LocalId {
        let id = LocalId::new(Ulid::new().to_string());
        let mut record = LocalTaskRecord::new(id.clone(), description);
        record.status = status;
        record.source = Some(field.source());
        record.set_identity(field, Some(value.to_string()));
        record.tags.insert(field.source().as_str().to_string());
        self.records.push(record);
        id
    }

    /// Look up a record by id.
    pub fn get(&self, id: &LocalId) -> Option<&LocalTaskRecord> {
        self.records.iter().find(|r| &r.local_id == id)
    }

    /// All records, in insertion order.
    pub fn records(&self) -> &[LocalTaskRecord] {
        &self.records
    }

    /// Every mutation received so far.
    pub fn calls(&self) -> &[StoreCall] {
        &self.calls
    }

    /// Make every call of `op` fail.
    pub fn fail_all(&mut self, op: StoreOp) {
        self.failures.insert(op, HashSet::new());
    }

    /// Make calls of `op` fail for `key`.
    ///
    /// `key` is the identity value for `Find`/`Create`, the local id otherwise.
    pub fn fail_for(&mut self, op: StoreOp, key: impl Into<String>) {
        self.failures.entry(op).or_default().insert(key.into());
    }

    fn check(&self, op: StoreOp, key: &str) -> Result<()> {
        match self.failures.get(&op) {
            Some(keys) if keys.is_empty() || keys.contains(key) => Err(StoreError::Command {
                command: format!("{op:?}").to_lowercase(),
                status: "exit status: 1".to_string(),
                stderr: format!("injected failure for {key}"),
            }),
            _ => Ok(()),
        }
    }

    fn record_mut(&mut self, id: &LocalId) -> Result<&mut LocalTaskRecord> {
        self.records
            .iter_mut()
            .find(|r| &r.local_id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn find_by_identity(
        &self,
        field: IdentityField,
        value: &str,
        status: TaskStatus,
    ) -> Result<Option<LocalTaskRecord>> {
        self.check(StoreOp::Find, value)?;
        Ok(self
            .records
            .iter()
            .find(|r| r.status == status && r.identity(field) == Some(value))
            .cloned())
    }

    async fn list_pending_by_identity_field(
        &self,
        field: IdentityField,
    ) -> Result<Vec<(String, LocalId)>> {
        self.check(StoreOp::List, field.as_str())?;
        Ok(self
            .records
            .iter()
            .filter(|r| r.status.is_open())
            .filter_map(|r| r.identity(field).map(|v| (v.to_string(), r.local_id.clone())))
            .collect())
    }

    async fn list_completed_by_identity_field(
        &self,
        field: IdentityField,
    ) -> Result<Vec<LocalTaskRecord>> {
        self.check(StoreOp::List, field.as_str())?;
        Ok(self
            .records
            .iter()
            .filter(|r| r.status == TaskStatus::Completed && r.identity(field).is_some())
            .cloned()
            .collect())
    }

    async fn create(&mut self, task: &NewTask) -> Result<LocalId> {
        self.check(StoreOp::Create, &task.identity.value)?;
        self.calls.push(StoreCall::Create(task.clone()));

        let id = LocalId::new(Ulid::new().to_string());
        let mut record = LocalTaskRecord::new(id.clone(), task.description.clone());
        record.source = Some(task.source);
        record.set_identity(task.identity.field, Some(task.identity.value.clone()));
        record.tags = task.tags.clone();
        record.project = task.project.clone();
        record.due = task.due;
        record.priority = task.priority;
        self.records.push(record);
        Ok(id)
    }

    async fn modify(&mut self, id: &LocalId, changes: &[FieldChange]) -> Result<()> {
        self.check(StoreOp::Modify, id.as_str())?;
        self.calls.push(StoreCall::Modify(id.clone(), changes.to_vec()));

        let record = self.record_mut(id)?;
        for change in changes {
            match change {
                FieldChange::Description(d) => record.description = d.clone(),
                FieldChange::Project(p) => record.project = Some(p.clone()),
                FieldChange::Due(d) => record.due = Some(*d),
                FieldChange::Priority(p) => record.priority = Some(*p),
                FieldChange::Tags { added, removed } => {
                    record.tags.retain(|t| !removed.contains(t));
                    record.tags.extend(added.iter().cloned());
                }
            }
        }
        Ok(())
    }

    async fn annotate(&mut self, id: &LocalId, text: &str) -> Result<()> {
        self.check(StoreOp::Annotate, id.as_str())?;
        self.calls.push(StoreCall::Annotate(id.clone(), text.to_string()));
        self.record_mut(id)?.annotations.push(text.to_string());
        Ok(())
    }

    async fn set_dependency(&mut self, dependent: &LocalId, dependency: &LocalId) -> Result<()> {
        self.check(StoreOp::SetDependency, dependent.as_str())?;
        if self.get(dependency).is_none() {
            return Err(StoreError::NotFound(dependency.to_string()));
        }
        self.calls
            .push(StoreCall::SetDependency(dependent.clone(), dependency.clone()));
        self.record_mut(dependent)?.depends.insert(dependency.clone());
        Ok(())
    }

    async fn complete(&mut self, id: &LocalId) -> Result<()> {
        self.check(StoreOp::Complete, id.as_str())?;
        self.calls.push(StoreCall::Complete(id.clone()));
        self.record_mut(id)?.status = TaskStatus::Completed;
        Ok(())
    }

    async fn mark_synced(&mut self, id: &LocalId, field: IdentityField) -> Result<()> {
        self.check(StoreOp::MarkSynced, id.as_str())?;
        self.calls.push(StoreCall::MarkSynced(id.clone(), field));
        self.record_mut(id)?.set_synced(field, true);
        Ok(())
    }
}
