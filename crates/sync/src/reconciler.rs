//! Idempotent upsert of canonical tasks into the local store.

use std::collections::{BTreeSet, HashMap};

use todosync_core::{
    clean_annotation, normalize_tag, normalize_tags, CanonicalTask, IdentityField, LocalId,
    LocalTaskRecord, TaskStatus,
};
use todosync_storage::{FieldChange, NewTask, TaskStore};
use tracing::{debug, info, warn};

use crate::{Stage, TaskError};

/// What an upsert did (or, in a dry run, would have done).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    /// A new local record was created
    Created,
    /// An existing record was changed
    Updated,
    /// An existing record already matched
    Skipped,
}

/// Result of reconciling one canonical task.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// What happened
    pub action: UpsertAction,
    /// Record the identity now maps to (a planned id in dry runs)
    pub local_id: LocalId,
    /// Fields changed by an update
    pub changes: Vec<FieldChange>,
    /// Annotations that could not be attached after a create
    pub annotation_errors: Vec<TaskError>,
}

/// Identity value -> local id for every task reconciled in the current run.
///
/// Also remembers the dependencies an existing record already had, so
/// linking can skip edges that are in place. Built fresh per run and never
/// persisted.
#[derive(Debug, Clone, Default)]
pub struct IdentityIndex {
    entries: HashMap<String, IndexEntry>,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    id: LocalId,
    depends: BTreeSet<LocalId>,
}

impl IdentityIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record where a newly created identity lives.
    pub fn insert(&mut self, identity: impl Into<String>, id: LocalId) {
        self.insert_with_depends(identity, id, BTreeSet::new());
    }

    /// Record an existing record along with its current dependencies.
    pub fn insert_with_depends(
        &mut self,
        identity: impl Into<String>,
        id: LocalId,
        depends: BTreeSet<LocalId>,
    ) {
        self.entries.insert(identity.into(), IndexEntry { id, depends });
    }

    /// Local id reconciled for `identity` this run.
    pub fn get(&self, identity: &str) -> Option<&LocalId> {
        self.entries.get(identity).map(|e| &e.id)
    }

    /// True when the record for `identity` already depends on `dependency`.
    pub fn depends_on(&self, identity: &str, dependency: &LocalId) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|e| e.depends.contains(dependency))
    }

    /// Number of identities indexed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been reconciled yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Changes needed to bring `record` in line with `task`.
///
/// Source fields that are absent leave the local value untouched. Tags are
/// compared as normalized sets, so `"my tag"` locally equals `"my_tag"`.
pub fn diff(record: &LocalTaskRecord, task: &CanonicalTask) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if record.description != task.description {
        changes.push(FieldChange::Description(task.description.clone()));
    }
    if let Some(project) = &task.project {
        if record.project.as_ref() != Some(project) {
            changes.push(FieldChange::Project(project.clone()));
        }
    }
    if let Some(due) = task.due {
        if record.due != Some(due) {
            changes.push(FieldChange::Due(due));
        }
    }
    if let Some(priority) = task.priority {
        if record.priority != Some(priority) {
            changes.push(FieldChange::Priority(priority));
        }
    }

    let local_tags = normalize_tags(&record.tags);
    if local_tags != task.tags {
        let added: BTreeSet<String> = task.tags.difference(&local_tags).cloned().collect();
        let removed: BTreeSet<String> = record
            .tags
            .iter()
            .filter(|t| !task.tags.contains(&normalize_tag(t)))
            .cloned()
            .collect();
        changes.push(FieldChange::Tags { added, removed });
    }

    changes
}

/// Creates or updates the local record for one external identity.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    dry_run: bool,
}

impl Reconciler {
    /// Create a reconciler; `dry_run` suppresses every mutation.
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Upsert `task` under `field = value` and record the result in `index`.
    ///
    /// Looks for a pending record first, then a waiting one. A failed lookup
    /// counts as "not found".
    pub async fn upsert(
        &self,
        store: &mut dyn TaskStore,
        field: IdentityField,
        value: &str,
        task: &CanonicalTask,
        index: &mut IdentityIndex,
    ) -> Result<UpsertOutcome, TaskError> {
        match find_open(store, field, value).await {
            Some(existing) => self.update(store, value, existing, task, index).await,
            None => self.create(store, value, task, index).await,
        }
    }

    async fn update(
        &self,
        store: &mut dyn TaskStore,
        value: &str,
        existing: LocalTaskRecord,
        task: &CanonicalTask,
        index: &mut IdentityIndex,
    ) -> Result<UpsertOutcome, TaskError> {
        let id = existing.local_id.clone();
        index.insert_with_depends(value, id.clone(), existing.depends.clone());

        let changes = diff(&existing, task);
        if changes.is_empty() {
            debug!(identity = value, "Unchanged");
            return Ok(UpsertOutcome {
                action: UpsertAction::Skipped,
                local_id: id,
                changes,
                annotation_errors: Vec::new(),
            });
        }

        let fields: Vec<_> = changes.iter().map(FieldChange::field_name).collect();
        if self.dry_run {
            info!(identity = value, fields = ?fields, "[dry run] Would update: {}", task.description);
        } else {
            store
                .modify(&id, &changes)
                .await
                .map_err(|e| TaskError::new(value, Stage::Update, e))?;
            info!(identity = value, fields = ?fields, "Updated: {}", task.description);
        }

        Ok(UpsertOutcome {
            action: UpsertAction::Updated,
            local_id: id,
            changes,
            annotation_errors: Vec::new(),
        })
    }

    async fn create(
        &self,
        store: &mut dyn TaskStore,
        value: &str,
        task: &CanonicalTask,
        index: &mut IdentityIndex,
    ) -> Result<UpsertOutcome, TaskError> {
        if self.dry_run {
            info!(identity = value, "[dry run] Would create: {}", task.description);
            let id = LocalId::planned(value);
            index.insert(value, id.clone());
            return Ok(UpsertOutcome {
                action: UpsertAction::Created,
                local_id: id,
                changes: Vec::new(),
                annotation_errors: Vec::new(),
            });
        }

        let id = store
            .create(&NewTask::from(task))
            .await
            .map_err(|e| TaskError::new(value, Stage::Create, e))?;
        index.insert(value, id.clone());
        info!(identity = value, id = %id, "Created: {}", task.description);

        let mut annotation_errors = Vec::new();
        for text in task.annotations.iter().filter_map(|a| clean_annotation(a)) {
            if let Err(e) = store.annotate(&id, &text).await {
                warn!(identity = value, error = %e, "Failed to attach note");
                annotation_errors.push(TaskError::new(value, Stage::Annotate, e));
            }
        }

        Ok(UpsertOutcome {
            action: UpsertAction::Created,
            local_id: id,
            changes: Vec::new(),
            annotation_errors,
        })
    }
}

async fn find_open(
    store: &dyn TaskStore,
    field: IdentityField,
    value: &str,
) -> Option<LocalTaskRecord> {
    for status in [TaskStatus::Pending, TaskStatus::Waiting] {
        match store.find_by_identity(field, value, status).await {
            Ok(Some(record)) => return Some(record),
            Ok(None) => {}
            Err(e) => {
                warn!(identity = value, status = %status, error = %e, "Lookup failed, treating as not found");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use todosync_core::{Priority, Source, TaskBuilder};
    use todosync_storage::{MemoryStore, StoreCall, StoreOp};

    fn asana(gid: &str, title: &str) -> TaskBuilder {
        TaskBuilder::new(Source::Asana, gid, title)
    }

    #[tokio::test]
    async fn test_create_attaches_one_annotation_per_note() {
        let mut store = MemoryStore::new();
        let mut index = IdentityIndex::new();
        let long = "x".repeat(1500);
        let task = asana("1", "Write report")
            .annotation("  outline first  ")
            .annotation("   ")
            .annotation(long)
            .build()
            .unwrap();

        let outcome = Reconciler::new(false)
            .upsert(&mut store, IdentityField::AsanaGid, "1", &task, &mut index)
            .await
            .unwrap();

        assert_eq!(outcome.action, UpsertAction::Created);
        assert_eq!(index.get("1"), Some(&outcome.local_id));
        let notes: Vec<_> = store
            .calls()
            .iter()
            .filter_map(|c| match c {
                StoreCall::Annotate(_, text) => Some(text.chars().count()),
                _ => None,
            })
            .collect();
        assert_eq!(notes, vec!["outline first".len(), 1000]);
    }

    #[tokio::test]
    async fn test_second_upsert_is_skipped() {
        let mut store = MemoryStore::new();
        let mut index = IdentityIndex::new();
        let task = asana("1", "Write report")
            .tags(["deep work"])
            .project(Some("Q3"))
            .due(NaiveDate::from_ymd_opt(2025, 6, 1))
            .build()
            .unwrap();
        let reconciler = Reconciler::new(false);

        reconciler
            .upsert(&mut store, IdentityField::AsanaGid, "1", &task, &mut index)
            .await
            .unwrap();
        let calls = store.calls().len();
        let again = reconciler
            .upsert(&mut store, IdentityField::AsanaGid, "1", &task, &mut index)
            .await
            .unwrap();

        assert_eq!(again.action, UpsertAction::Skipped);
        assert_eq!(store.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_update_carries_only_changed_field() {
        let mut store = MemoryStore::new();
        let mut index = IdentityIndex::new();
        let reconciler = Reconciler::new(false);
        let before = asana("1", "Write report")
            .due(NaiveDate::from_ymd_opt(2025, 6, 1))
            .build()
            .unwrap();
        reconciler
            .upsert(&mut store, IdentityField::AsanaGid, "1", &before, &mut index)
            .await
            .unwrap();

        let mut after = before.clone();
        after.due = NaiveDate::from_ymd_opt(2025, 7, 1);
        let outcome = reconciler
            .upsert(&mut store, IdentityField::AsanaGid, "1", &after, &mut index)
            .await
            .unwrap();

        assert_eq!(outcome.action, UpsertAction::Updated);
        let expected = vec![FieldChange::Due(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap())];
        assert_eq!(outcome.changes, expected);
        assert_eq!(
            store.calls().last(),
            Some(&StoreCall::Modify(outcome.local_id.clone(), expected))
        );
    }

    #[tokio::test]
    async fn test_waiting_record_is_updated_not_duplicated() {
        let mut store = MemoryStore::new();
        let id = store.insert_with_identity(IdentityField::Things3Uuid, "t1", "Old", TaskStatus::Waiting);
        let task = TaskBuilder::new(Source::Things3, "t1", "New").build().unwrap();

        let outcome = Reconciler::new(false)
            .upsert(&mut store, IdentityField::Things3Uuid, "t1", &task, &mut IdentityIndex::new())
            .await
            .unwrap();

        assert_eq!(outcome.action, UpsertAction::Updated);
        assert_eq!(outcome.local_id, id);
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_diff_tag_sets_compare_normalized() {
        let task = asana("1", "Write").tags(["my tag"]).build().unwrap();
        let mut record = LocalTaskRecord::from_canonical(LocalId::new("x"), &task);
        record.tags = ["my tag", "asana"].into_iter().map(String::from).collect();
        assert!(diff(&record, &task).is_empty());

        record.tags.insert("extra".to_string());
        let changes = diff(&record, &task);
        assert_eq!(
            changes,
            vec![FieldChange::Tags {
                added: BTreeSet::new(),
                removed: ["extra".to_string()].into(),
            }]
        );
    }

    #[test]
    fn test_diff_ignores_fields_source_leaves_unset() {
        let task = asana("1", "Write").build().unwrap();
        let mut record = LocalTaskRecord::from_canonical(LocalId::new("x"), &task);
        record.priority = Some(Priority::H);
        record.project = Some("Personal".to_string());
        record.due = NaiveDate::from_ymd_opt(2025, 6, 1);
        assert!(diff(&record, &task).is_empty());
    }

    #[tokio::test]
    async fn test_unset_source_fields_keep_local_values() {
        let mut store = MemoryStore::new();
        let mut index = IdentityIndex::new();
        let reconciler = Reconciler::new(false);
        let dated = asana("1", "Write report")
            .project(Some("Q3"))
            .due(NaiveDate::from_ymd_opt(2025, 6, 1))
            .build()
            .unwrap();
        reconciler
            .upsert(&mut store, IdentityField::AsanaGid, "1", &dated, &mut index)
            .await
            .unwrap();
        let calls = store.calls().len();

        let undated = asana("1", "Write report").build().unwrap();
        let outcome = reconciler
            .upsert(&mut store, IdentityField::AsanaGid, "1", &undated, &mut index)
            .await
            .unwrap();

        assert_eq!(outcome.action, UpsertAction::Skipped);
        assert_eq!(store.calls().len(), calls);
        let record = store.get(&outcome.local_id).unwrap();
        assert_eq!(record.project.as_deref(), Some("Q3"));
        assert_eq!(record.due, NaiveDate::from_ymd_opt(2025, 6, 1));
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_mutating() {
        let mut store = MemoryStore::new();
        store.insert_with_identity(IdentityField::AsanaGid, "2", "Old title", TaskStatus::Pending);
        let mut index = IdentityIndex::new();
        let reconciler = Reconciler::new(true);

        let new = asana("1", "Fresh").annotation("note").build().unwrap();
        let created = reconciler
            .upsert(&mut store, IdentityField::AsanaGid, "1", &new, &mut index)
            .await
            .unwrap();
        let renamed = asana("2", "New title").build().unwrap();
        let updated = reconciler
            .upsert(&mut store, IdentityField::AsanaGid, "2", &renamed, &mut index)
            .await
            .unwrap();

        assert_eq!(created.action, UpsertAction::Created);
        assert!(created.local_id.is_planned());
        assert_eq!(updated.action, UpsertAction::Updated);
        assert!(store.calls().is_empty());
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_lookup_falls_back_to_create() {
        let mut store = MemoryStore::new();
        store.fail_all(StoreOp::Find);
        let task = asana("1", "Write").build().unwrap();

        let outcome = Reconciler::new(false)
            .upsert(&mut store, IdentityField::AsanaGid, "1", &task, &mut IdentityIndex::new())
            .await
            .unwrap();
        assert_eq!(outcome.action, UpsertAction::Created);
    }

    #[tokio::test]
    async fn test_annotation_failure_keeps_created_record() {
        let mut store = MemoryStore::new();
        store.fail_all(StoreOp::Annotate);
        let mut index = IdentityIndex::new();
        let task = asana("1", "Write").annotation("note").build().unwrap();

        let outcome = Reconciler::new(false)
            .upsert(&mut store, IdentityField::AsanaGid, "1", &task, &mut index)
            .await
            .unwrap();
        assert_eq!(outcome.action, UpsertAction::Created);
        assert_eq!(outcome.annotation_errors.len(), 1);
        assert_eq!(outcome.annotation_errors[0].stage, Stage::Annotate);
        assert!(index.get("1").is_some());
    }

    #[tokio::test]
    async fn test_create_failure_is_reported() {
        let mut store = MemoryStore::new();
        store.fail_for(StoreOp::Create, "1");
        let task = asana("1", "Write").build().unwrap();

        let err = Reconciler::new(false)
            .upsert(&mut store, IdentityField::AsanaGid, "1", &task, &mut IdentityIndex::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Create);
        assert_eq!(err.identity, "1");
    }
}
