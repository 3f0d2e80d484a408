//! Relevance classification for imported tasks.
//!
//! A classifier answers one question per task: keep it or not. Callers treat
//! any classifier error as "keep everything".

#![warn(missing_docs)]

pub mod ollama;

use async_trait::async_trait;
use todosync_core::CanonicalTask;
use tracing::info;

pub use ollama::OllamaClassifier;

/// Error type for classifier operations.
pub type Result<T> = std::result::Result<T, ClassifierError>;

/// Errors that can occur while classifying.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// The request could not be completed (connection refused, timeout)
    #[error("cannot reach classifier at {url}: {source}")]
    Request {
        /// Server URL
        url: String,
        /// Underlying error
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with an error status
    #[error("classifier returned status {status}: {body}")]
    Status {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// The response body could not be decoded
    #[error("invalid classifier response: {0}")]
    InvalidResponse(String),
}

/// Decides whether a task should be imported.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// `true` keeps the task.
    async fn classify(&self, title: &str, notes: &str) -> Result<bool>;
}

/// Tasks split by a classifier.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// Tasks to import
    pub kept: Vec<CanonicalTask>,
    /// Tasks the classifier rejected
    pub excluded: Vec<CanonicalTask>,
}

/// Run every task through `classifier`, preserving order.
///
/// The first classifier error aborts the whole filter so the caller can fall
/// back to importing the unfiltered list.
pub async fn filter_tasks(
    classifier: &dyn Classifier,
    tasks: Vec<CanonicalTask>,
) -> Result<FilterOutcome> {
    let mut outcome = FilterOutcome::default();

    for task in tasks {
        if classifier.classify(&task.description, task.notes()).await? {
            outcome.kept.push(task);
        } else {
            info!(description = %task.description, "Classifier excluded task");
            outcome.excluded.push(task);
        }
    }

    Ok(outcome)
}
