//! Completes local records whose source task disappeared.

use std::collections::HashSet;

use todosync_core::{IdentityField, LocalId};
use todosync_storage::{StoreError, TaskStore};
use tracing::{info, warn};

use crate::{Stage, TaskError};

/// Outcome of one stale pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaleReport {
    /// Open records no longer present upstream, as (identity, local id)
    pub stale: Vec<(String, LocalId)>,
    /// How many of those were completed
    pub completed: usize,
    /// Per-record failures
    pub errors: Vec<TaskError>,
}

impl StaleReport {
    /// Number of stale records found.
    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }
}

/// Detects and completes stale records for one source.
#[derive(Debug, Clone, Default)]
pub struct StaleDetector {
    dry_run: bool,
}

impl StaleDetector {
    /// Create a detector; `dry_run` reports without completing.
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Complete every open record carrying `field` whose value is not in `fetched`.
    ///
    /// `fetched` must be the full set returned by a successful fetch, taken
    /// before any relevance filtering. Completed records are also marked
    /// synced for the source so they are never pushed back.
    pub async fn detect_stale(
        &self,
        store: &mut dyn TaskStore,
        field: IdentityField,
        fetched: &HashSet<String>,
    ) -> Result<StaleReport, StoreError> {
        let open = store.list_pending_by_identity_field(field).await?;

        let mut report = StaleReport {
            stale: open
                .into_iter()
                .filter(|(identity, _)| !fetched.contains(identity))
                .collect(),
            ..Default::default()
        };

        for (identity, id) in &report.stale {
            if self.dry_run {
                info!(identity = %identity, id = %id, "[dry run] Would complete stale task");
                continue;
            }

            if let Err(e) = store.complete(id).await {
                warn!(identity = %identity, error = %e, "Failed to complete stale task");
                report.errors.push(TaskError::new(identity.as_str(), Stage::Complete, e));
                continue;
            }
            report.completed += 1;
            info!(identity = %identity, id = %id, "Completed stale task");

            if let Err(e) = store.mark_synced(id, field).await {
                warn!(identity = %identity, error = %e, "Failed to mark stale task synced");
                report.errors.push(TaskError::new(identity.as_str(), Stage::MarkSynced, e));
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use todosync_core::TaskStatus;
    use todosync_storage::{MemoryStore, StoreCall, StoreOp};

    fn seeded(identities: &[&str]) -> (MemoryStore, Vec<LocalId>) {
        let mut store = MemoryStore::new();
        let ids = identities
            .iter()
            .map(|v| store.insert_with_identity(IdentityField::Things3Uuid, v, v, TaskStatus::Pending))
            .collect();
        (store, ids)
    }

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_completes_only_missing_identity() {
        let (mut store, ids) = seeded(&["A", "B", "C"]);

        let report = StaleDetector::new(false)
            .detect_stale(&mut store, IdentityField::Things3Uuid, &set(&["A", "B"]))
            .await
            .unwrap();

        assert_eq!(report.stale, vec![("C".to_string(), ids[2].clone())]);
        assert_eq!(report.completed, 1);
        assert_eq!(
            store.calls(),
            &[
                StoreCall::Complete(ids[2].clone()),
                StoreCall::MarkSynced(ids[2].clone(), IdentityField::Things3Uuid),
            ]
        );
    }

    #[tokio::test]
    async fn test_ignores_other_sources_and_closed_records() {
        let (mut store, _) = seeded(&["A"]);
        store.insert_with_identity(IdentityField::AsanaGid, "99", "Asana", TaskStatus::Pending);
        store.insert_with_identity(IdentityField::Things3Uuid, "old", "Done", TaskStatus::Completed);

        let report = StaleDetector::new(false)
            .detect_stale(&mut store, IdentityField::Things3Uuid, &set(&["A"]))
            .await
            .unwrap();

        assert!(report.stale.is_empty());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let (mut store, ids) = seeded(&["A", "B"]);
        store.fail_for(StoreOp::Complete, ids[0].as_str());

        let report = StaleDetector::new(false)
            .detect_stale(&mut store, IdentityField::Things3Uuid, &HashSet::new())
            .await
            .unwrap();

        assert_eq!(report.stale_count(), 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].identity, "A");
        assert_eq!(store.get(&ids[1]).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_completing() {
        let (mut store, _) = seeded(&["A", "B"]);

        let report = StaleDetector::new(true)
            .detect_stale(&mut store, IdentityField::Things3Uuid, &set(&["A"]))
            .await
            .unwrap();

        assert_eq!(report.stale_count(), 1);
        assert_eq!(report.completed, 0);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_is_returned() {
        let (mut store, _) = seeded(&["A"]);
        store.fail_all(StoreOp::List);

        let result = StaleDetector::new(false)
            .detect_stale(&mut store, IdentityField::Things3Uuid, &HashSet::new())
            .await;
        assert!(result.is_err());
        assert!(store.calls().is_empty());
    }
}
