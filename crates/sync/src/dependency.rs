//! Parent/subtask dependency linking.

use std::collections::HashSet;

use todosync_core::LocalId;
use todosync_storage::TaskStore;
use tracing::{debug, info};

use crate::reconciler::IdentityIndex;
use crate::{Stage, TaskError};

/// Links subtasks to their parents within one run.
///
/// The parent depends on the child, so it stays blocked until every subtask
/// is done. Only identities reconciled in the current run are resolved.
#[derive(Debug, Clone, Default)]
pub struct DependencyLinker {
    dry_run: bool,
    /// (dependent, dependency) pairs already written this run
    linked: HashSet<(LocalId, LocalId)>,
}

impl DependencyLinker {
    /// Create a linker; `dry_run` resolves without writing.
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            linked: HashSet::new(),
        }
    }

    /// Make `parent` depend on `child`.
    ///
    /// Returns `Ok(false)` when either side was not reconciled this run, or
    /// the edge already exists in the store or was written earlier this run.
    pub async fn link(
        &mut self,
        store: &mut dyn TaskStore,
        child: &str,
        parent: &str,
        index: &IdentityIndex,
    ) -> Result<bool, TaskError> {
        let (Some(child_id), Some(parent_id)) = (index.get(child), index.get(parent)) else {
            debug!(child, parent, "Parent or subtask not in this run, skipping link");
            return Ok(false);
        };

        if index.depends_on(parent, child_id) {
            debug!(child, parent, "Subtask already linked");
            return Ok(false);
        }
        let edge = (parent_id.clone(), child_id.clone());
        if self.linked.contains(&edge) {
            return Ok(false);
        }

        if self.dry_run {
            info!(child, parent, "[dry run] Would link subtask to parent");
        } else {
            store
                .set_dependency(parent_id, child_id)
                .await
                .map_err(|e| TaskError::new(child, Stage::Link, e))?;
            debug!(child, parent, "Linked subtask to parent");
        }

        self.linked.insert(edge);
        Ok(true)
    }

    /// Number of edges written (or planned) so far.
    pub fn linked(&self) -> usize {
        self.linked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use todosync_core::{IdentityField, TaskStatus};
    use todosync_storage::{MemoryStore, StoreCall};

    fn seeded() -> (MemoryStore, IdentityIndex, LocalId, LocalId) {
        let mut store = MemoryStore::new();
        let parent = store.insert_with_identity(IdentityField::AsanaGid, "p", "Parent", TaskStatus::Pending);
        let child = store.insert_with_identity(IdentityField::AsanaGid, "c", "Child", TaskStatus::Pending);
        let mut index = IdentityIndex::new();
        index.insert("p", parent.clone());
        index.insert("c", child.clone());
        (store, index, parent, child)
    }

    #[tokio::test]
    async fn test_parent_depends_on_child_once() {
        let (mut store, index, parent, child) = seeded();
        let mut linker = DependencyLinker::new(false);

        assert!(linker.link(&mut store, "c", "p", &index).await.unwrap());
        assert!(!linker.link(&mut store, "c", "p", &index).await.unwrap());

        assert_eq!(store.calls(), &[StoreCall::SetDependency(parent.clone(), child.clone())]);
        assert!(store.get(&parent).unwrap().depends.contains(&child));
        assert_eq!(linker.linked(), 1);
    }

    #[tokio::test]
    async fn test_existing_edge_is_not_rewritten() {
        let (mut store, _, parent, child) = seeded();
        store.set_dependency(&parent, &child).await.unwrap();
        let calls = store.calls().len();

        let mut index = IdentityIndex::new();
        let depends = store.get(&parent).unwrap().depends.clone();
        index.insert_with_depends("p", parent.clone(), depends);
        index.insert("c", child.clone());

        let mut linker = DependencyLinker::new(false);
        assert!(!linker.link(&mut store, "c", "p", &index).await.unwrap());
        assert_eq!(store.calls().len(), calls);
        assert_eq!(linker.linked(), 0);
    }

    #[tokio::test]
    async fn test_missing_parent_is_skipped_silently() {
        let (mut store, index, _, _) = seeded();
        let mut linker = DependencyLinker::new(false);

        assert!(!linker.link(&mut store, "c", "elsewhere", &index).await.unwrap());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_writing() {
        let (mut store, index, _, _) = seeded();
        let mut linker = DependencyLinker::new(true);

        assert!(linker.link(&mut store, "c", "p", &index).await.unwrap());
        assert!(store.calls().is_empty());
    }
}
