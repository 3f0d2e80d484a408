//! External task sources: fetchers that produce canonical tasks and writers
//! that push local completions back.

#![warn(missing_docs)]

pub mod asana;
pub mod things;

use std::collections::HashSet;

use async_trait::async_trait;
use todosync_core::{CanonicalTask, ParseError, Source};

pub use asana::{AsanaClient, DEFAULT_ASANA_URL};
pub use things::{ThingsReader, ThingsUrlWriter};

/// Error type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors that can occur while talking to a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Required configuration is missing
    #[error("{0}")]
    NotConfigured(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with an error status
    #[error("API returned status {status}: {body}")]
    Status {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error (spawning helpers, locating files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A helper command exited unsuccessfully
    #[error("`{command}` failed: {status}")]
    Command {
        /// Program run
        command: String,
        /// Exit status
        status: String,
    },

    /// A source record could not be normalized
    #[error(transparent)]
    Build(#[from] ParseError),

    /// Anything else the source reports
    #[error("{0}")]
    Other(String),
}

/// Result of one fetch.
///
/// `seen` holds every open identity the source reported, including records
/// that could not be normalized into `tasks`. Staleness is judged against
/// `seen`, so a malformed upstream record never closes its local copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    /// Normalized tasks, in source order
    pub tasks: Vec<CanonicalTask>,
    /// Every identity value seen
    pub seen: HashSet<String>,
}

impl FetchOutcome {
    /// Create an empty outcome.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a normalized task.
    pub fn push(&mut self, task: CanonicalTask) {
        self.seen.insert(task.identity.value.clone());
        self.tasks.push(task);
    }

    /// Record an identity whose task could not be normalized.
    pub fn skip(&mut self, identity: impl Into<String>) {
        self.seen.insert(identity.into());
    }

    /// Number of seen identities that did not produce a task.
    pub fn skipped(&self) -> usize {
        self.seen.len().saturating_sub(self.tasks.len())
    }
}

impl From<Vec<CanonicalTask>> for FetchOutcome {
    fn from(tasks: Vec<CanonicalTask>) -> Self {
        let mut outcome = Self::new();
        for task in tasks {
            outcome.push(task);
        }
        outcome
    }
}

/// Reads open tasks from one source.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Source this fetcher reads.
    fn source(&self) -> Source;

    /// Every open task, in source order, plus every identity seen.
    async fn fetch(&self) -> Result<FetchOutcome>;
}

/// Marks tasks complete in one source.
#[async_trait]
pub trait CompletionWriter: Send + Sync {
    /// Source this writer updates.
    fn source(&self) -> Source;

    /// Mark the task with this identity value complete.
    async fn complete(&self, identity: &str) -> Result<()>;
}
