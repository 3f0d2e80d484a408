//! Pushes local completions back to a source.

use std::time::Duration;

use todosync_sources::CompletionWriter;
use todosync_storage::{StoreError, TaskStore};
use tracing::{debug, info, warn};

use crate::{Stage, TaskError};

/// Default pause between successive source writes.
pub const DEFAULT_PUSH_DELAY: Duration = Duration::from_millis(250);

/// Outcome of one push pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
    /// Completions written and recorded
    pub synced: usize,
    /// Records already synced
    pub skipped: usize,
    /// Per-record failures
    pub errors: Vec<TaskError>,
}

impl PushReport {
    /// One-line summary for the terminal.
    pub fn summary(&self, source: &str) -> String {
        let mut line = format!("{source} push: {} synced, {} already synced", self.synced, self.skipped);
        if !self.errors.is_empty() {
            line.push_str(&format!(", {} errors", self.errors.len()));
        }
        line
    }
}

/// Writes completions of local records to their source, at most once each.
#[derive(Debug, Clone)]
pub struct CompletionPusher {
    delay: Duration,
    dry_run: bool,
}

impl Default for CompletionPusher {
    fn default() -> Self {
        Self {
            delay: DEFAULT_PUSH_DELAY,
            dry_run: false,
        }
    }
}

impl CompletionPusher {
    /// Create a pusher.
    pub fn new(delay: Duration, dry_run: bool) -> Self {
        Self { delay, dry_run }
    }

    /// Push every completed, not yet synced record carrying the writer's identity field.
    ///
    /// The synced flag is only set after the source accepted the write, so a
    /// failed write is retried on the next run.
    pub async fn push_completions(
        &self,
        store: &mut dyn TaskStore,
        writer: &dyn CompletionWriter,
    ) -> Result<PushReport, StoreError> {
        let source = writer.source();
        let field = source.identity_field();
        let completed = store.list_completed_by_identity_field(field).await?;

        let mut report = PushReport::default();
        let mut writes = 0usize;

        for record in completed {
            let Some(identity) = record.identity(field) else {
                continue;
            };
            if record.is_synced(field) {
                report.skipped += 1;
                continue;
            }

            if self.dry_run {
                info!(identity, "[dry run] Would complete in {}: {}", source.display_name(), record.description);
                report.synced += 1;
                continue;
            }

            if writes > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            writes += 1;

            if let Err(e) = writer.complete(identity).await {
                warn!(identity, error = %e, "Failed to complete in {}", source.display_name());
                report.errors.push(TaskError::new(identity, Stage::Push, e));
                continue;
            }

            match store.mark_synced(&record.local_id, field).await {
                Ok(()) => {
                    report.synced += 1;
                    info!(identity, "Completed in {}: {}", source.display_name(), record.description);
                }
                Err(e) => {
                    warn!(identity, error = %e, "Completed upstream but failed to record sync");
                    report.errors.push(TaskError::new(identity, Stage::MarkSynced, e));
                }
            }
        }

        debug!(synced = report.synced, skipped = report.skipped, "Push finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use todosync_core::{IdentityField, Source, TaskStatus};
    use todosync_sources::SourceError;
    use todosync_storage::{MemoryStore, StoreCall, StoreOp};

    #[derive(Default)]
    struct RecordingWriter {
        written: Mutex<Vec<String>>,
        reject: Option<String>,
    }

    #[async_trait]
    impl CompletionWriter for RecordingWriter {
        fn source(&self) -> Source {
            Source::Asana
        }

        async fn complete(&self, identity: &str) -> todosync_sources::Result<()> {
            if self.reject.as_deref() == Some(identity) {
                return Err(SourceError::Status { status: 500, body: "boom".to_string() });
            }
            self.written.lock().unwrap().push(identity.to_string());
            Ok(())
        }
    }

    fn completed_store(identities: &[&str]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for identity in identities {
            store.insert_with_identity(IdentityField::AsanaGid, identity, identity, TaskStatus::Completed);
        }
        store
    }

    #[tokio::test]
    async fn test_second_push_writes_nothing() {
        let mut store = completed_store(&["1", "2"]);
        let writer = RecordingWriter::default();
        let pusher = CompletionPusher::new(Duration::ZERO, false);

        let first = pusher.push_completions(&mut store, &writer).await.unwrap();
        let second = pusher.push_completions(&mut store, &writer).await.unwrap();

        assert_eq!(first.synced, 2);
        assert_eq!(second.synced, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(writer.written.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_write_stays_unsynced() {
        let mut store = completed_store(&["1", "2"]);
        let writer = RecordingWriter {
            reject: Some("1".to_string()),
            ..Default::default()
        };

        let report = CompletionPusher::new(Duration::ZERO, false)
            .push_completions(&mut store, &writer)
            .await
            .unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].stage, Stage::Push);
        let unsynced: Vec<_> = store
            .records()
            .iter()
            .filter(|r| !r.is_synced(IdentityField::AsanaGid))
            .map(|r| r.asana_gid.clone())
            .collect();
        assert_eq!(unsynced, vec![Some("1".to_string())]);
    }

    #[tokio::test]
    async fn test_ignores_other_source_and_open_records() {
        let mut store = completed_store(&["1"]);
        store.insert_with_identity(IdentityField::Things3Uuid, "t", "Things", TaskStatus::Completed);
        store.insert_with_identity(IdentityField::AsanaGid, "open", "Open", TaskStatus::Pending);
        let writer = RecordingWriter::default();

        CompletionPusher::new(Duration::ZERO, false)
            .push_completions(&mut store, &writer)
            .await
            .unwrap();
        assert_eq!(*writer.written.lock().unwrap(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let mut store = completed_store(&["1"]);
        let writer = RecordingWriter::default();

        let report = CompletionPusher::new(Duration::ZERO, true)
            .push_completions(&mut store, &writer)
            .await
            .unwrap();

        assert_eq!(report.synced, 1);
        assert!(writer.written.lock().unwrap().is_empty());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mark_synced_failure_is_counted() {
        let mut store = completed_store(&["1"]);
        store.fail_all(StoreOp::MarkSynced);
        let writer = RecordingWriter::default();

        let report = CompletionPusher::new(Duration::ZERO, false)
            .push_completions(&mut store, &writer)
            .await
            .unwrap();
        assert_eq!(report.synced, 0);
        assert_eq!(report.errors[0].stage, Stage::MarkSynced);
        assert!(!store.calls().iter().any(|c| matches!(c, StoreCall::MarkSynced(..))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_writes() {
        let mut store = completed_store(&["1", "2", "3"]);
        let writer = RecordingWriter::default();
        let started = tokio::time::Instant::now();

        CompletionPusher::new(Duration::from_millis(250), false)
            .push_completions(&mut store, &writer)
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(750));
    }

    #[test]
    fn test_summary_line() {
        let report = PushReport {
            synced: 2,
            skipped: 1,
            errors: Vec::new(),
        };
        assert_eq!(report.summary("Asana"), "Asana push: 2 synced, 1 already synced");
    }
}
