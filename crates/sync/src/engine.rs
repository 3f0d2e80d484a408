//! The sync engine - runs one pull or push for a source.

use std::time::Duration;

use todosync_classifier::{filter_tasks, Classifier};
use todosync_core::{CanonicalTask, Source};
use todosync_sources::{CompletionWriter, Fetcher};
use todosync_storage::TaskStore;
use tracing::{debug, error, info, warn};

use crate::{
    CompletionPusher, DependencyLinker, IdentityIndex, PushReport, Reconciler, Stage,
    StaleDetector, TaskError, UpsertAction, DEFAULT_PUSH_DELAY,
};

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Log intended mutations without performing them
    pub dry_run: bool,
    /// Pause between successive writes to a source
    pub push_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            push_delay: DEFAULT_PUSH_DELAY,
        }
    }
}

/// Outcome of one pull.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Source pulled
    pub source: Source,
    /// Tasks returned by the fetch
    pub fetched: usize,
    /// Open upstream records that could not be normalized
    pub invalid: usize,
    /// Tasks the classifier excluded
    pub filtered_out: usize,
    /// True when the classifier failed and everything was imported
    pub classifier_failed: bool,
    /// Local records created
    pub created: usize,
    /// Local records updated
    pub updated: usize,
    /// Local records already up to date
    pub skipped: usize,
    /// Parent/subtask edges written
    pub linked: usize,
    /// Open local records no longer upstream
    pub stale: usize,
    /// Stale records completed
    pub stale_completed: usize,
    /// Set when the fetch failed; nothing else ran
    pub fetch_error: Option<String>,
    /// Per-task failures
    pub errors: Vec<TaskError>,
}

impl SyncReport {
    fn new(source: Source) -> Self {
        Self {
            source,
            fetched: 0,
            invalid: 0,
            filtered_out: 0,
            classifier_failed: false,
            created: 0,
            updated: 0,
            skipped: 0,
            linked: 0,
            stale: 0,
            stale_completed: 0,
            fetch_error: None,
            errors: Vec::new(),
        }
    }

    /// True if the fetch failed or any task errored.
    pub fn has_errors(&self) -> bool {
        self.fetch_error.is_some() || !self.errors.is_empty()
    }

    /// One-line summary for the terminal.
    pub fn summary(&self) -> String {
        let name = self.source.display_name();
        if let Some(e) = &self.fetch_error {
            return format!("{name}: fetch failed: {e}");
        }

        let mut line = format!(
            "{name}: {} new, {} updated, {} unchanged",
            self.created, self.updated, self.skipped
        );
        if self.filtered_out > 0 {
            line.push_str(&format!(", {} filtered out by LLM", self.filtered_out));
        }
        if self.invalid > 0 {
            line.push_str(&format!(", {} invalid upstream", self.invalid));
        }
        if self.stale > 0 {
            line.push_str(&format!(", {} completed (removed upstream)", self.stale));
        }
        if self.linked > 0 {
            line.push_str(&format!(", {} subtasks linked", self.linked));
        }
        if !self.errors.is_empty() {
            line.push_str(&format!(", {} errors", self.errors.len()));
        }
        line
    }
}

/// The sync engine.
///
/// A pull runs:
/// ```text
/// Fetch → Classify → Reconcile → Link → Complete stale
/// ```
pub struct SyncEngine<S: TaskStore> {
    store: S,
    config: SyncConfig,
}

impl<S: TaskStore> SyncEngine<S> {
    /// Create a new engine over `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: SyncConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The underlying store, mutably.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Pull one source into the local store.
    ///
    /// Per-task failures are collected in the report; only a failed fetch
    /// stops the run, and it also skips stale detection.
    pub async fn pull(
        &mut self,
        fetcher: &dyn Fetcher,
        classifier: Option<&dyn Classifier>,
    ) -> SyncReport {
        let source = fetcher.source();
        let field = source.identity_field();
        let mut report = SyncReport::new(source);
        info!("Syncing {}", source.display_name());

        // 1. Fetch
        let outcome = match fetcher.fetch().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Failed to fetch from {}: {}", source.display_name(), e);
                report.fetch_error = Some(e.to_string());
                return report;
            }
        };
        report.fetched = outcome.tasks.len();
        report.invalid = outcome.skipped();
        debug!(count = report.fetched, invalid = report.invalid, "Fetched tasks");
        // Staleness is judged against everything seen, before classification
        let fetched = outcome.seen;
        let tasks = outcome.tasks;

        // 2. Classify
        let tasks = match classifier {
            Some(classifier) => self.classify(classifier, tasks, &mut report).await,
            None => tasks,
        };

        // 3. Reconcile
        let reconciler = Reconciler::new(self.config.dry_run);
        let mut index = IdentityIndex::new();
        for task in &tasks {
            let value = task.identity.value.as_str();
            match reconciler.upsert(&mut self.store, field, value, task, &mut index).await {
                Ok(outcome) => {
                    match outcome.action {
                        UpsertAction::Created => report.created += 1,
                        UpsertAction::Updated => report.updated += 1,
                        UpsertAction::Skipped => report.skipped += 1,
                    }
                    report.errors.extend(outcome.annotation_errors);
                }
                Err(e) => {
                    warn!("{}", e);
                    report.errors.push(e);
                }
            }
        }

        // 4. Link subtasks
        let mut linker = DependencyLinker::new(self.config.dry_run);
        for task in &tasks {
            let Some(parent) = &task.parent else {
                continue;
            };
            match linker.link(&mut self.store, &task.identity.value, parent, &index).await {
                Ok(true) => report.linked += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("{}", e);
                    report.errors.push(e);
                }
            }
        }

        // 5. Complete stale
        match StaleDetector::new(self.config.dry_run)
            .detect_stale(&mut self.store, field, &fetched)
            .await
        {
            Ok(stale) => {
                report.stale = stale.stale_count();
                report.stale_completed = stale.completed;
                report.errors.extend(stale.errors);
            }
            Err(e) => {
                error!("Stale detection for {} failed: {}", source.display_name(), e);
                report.errors.push(TaskError::new(field.as_str(), Stage::List, e));
            }
        }

        info!("{}", report.summary());
        report
    }

    async fn classify(
        &self,
        classifier: &dyn Classifier,
        tasks: Vec<CanonicalTask>,
        report: &mut SyncReport,
    ) -> Vec<CanonicalTask> {
        // Kept aside so a classifier failure can fall back to the full list
        let all = tasks.clone();
        match filter_tasks(classifier, tasks).await {
            Ok(outcome) => {
                report.filtered_out = outcome.excluded.len();
                outcome.kept
            }
            Err(e) => {
                warn!("Classifier unavailable ({}), importing all tasks unfiltered", e);
                report.classifier_failed = true;
                all
            }
        }
    }

    /// Push local completions back to the writer's source.
    pub async fn push(&mut self, writer: &dyn CompletionWriter) -> PushReport {
        let source = writer.source();
        let pusher = CompletionPusher::new(self.config.push_delay, self.config.dry_run);

        match pusher.push_completions(&mut self.store, writer).await {
            Ok(report) => {
                info!("{}", report.summary(source.display_name()));
                report
            }
            Err(e) => {
                error!("Failed to list completed {} tasks: {}", source.display_name(), e);
                PushReport {
                    errors: vec![TaskError::new(source.identity_field().as_str(), Stage::List, e)],
                    ..Default::default()
                }
            }
        }
    }
}
