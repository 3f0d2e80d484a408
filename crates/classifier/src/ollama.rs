//! Relevance classifier backed by a local Ollama model.
//!
//! Asks the model a strict yes/no question: does this task belong in a
//! terminal-based task manager? Only "yes" keeps the task.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde_json::json;
use tracing::debug;

use crate::{Classifier, ClassifierError, Result};

/// Default Ollama server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default model.
pub const DEFAULT_MODEL: &str = "lfm2.5-thinking";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const PROMPT_TEMPLATE: &str = "\
You are a strict task classifier. You decide if a task belongs in a software \
developer's terminal-based task manager (Taskwarrior).

ONLY answer \"yes\" for tasks that are done ON A COMPUTER:
- Coding, debugging, code review, pull requests
- Writing documents, emails, spreadsheets
- System admin, deployments, server work
- Digital design, technical research, online learning

Answer \"no\" for ANYTHING physical or away from a computer:
- Shopping, groceries, buying things in stores
- Chores: cleaning, laundry, cooking, dishes
- Appointments: doctor, dentist, haircut, mechanic
- Exercise, sports, outdoor activities
- Errands: post office, bank, picking things up
- Social: parties, dinners, meetups

When in doubt, answer \"no\".

Answer with ONLY \"yes\" or \"no\".

";

/// Build the classification prompt for one task.
pub fn build_prompt(title: &str, notes: &str) -> String {
    let mut prompt = format!("{PROMPT_TEMPLATE}Task: {title}\n");
    if !notes.trim().is_empty() {
        prompt.push_str(&format!("Notes: {}\n", notes.trim()));
    }
    prompt
}

/// Interpret the model's answer. Reasoning inside `<think>` tags is ignored.
pub fn parse_answer(response: &str) -> bool {
    let answer = response.trim().to_lowercase();
    let answer = match answer.rsplit_once("</think>") {
        Some((_, after)) => after.trim(),
        None => answer.as_str(),
    };
    answer.starts_with("yes")
}

/// Ollama classifier client.
#[derive(Clone)]
pub struct OllamaClassifier {
    /// HTTP client
    client: Client,

    /// Ollama server URL
    url: String,

    /// Model name
    model: String,
}

impl OllamaClassifier {
    /// Create a classifier with a per-request timeout.
    ///
    /// Fails if the HTTP client cannot be built, rather than falling back to
    /// a client without the timeout.
    pub fn new(url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into().trim_end_matches('/').to_string();
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|source| ClassifierError::Request {
                url: url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            url,
            model: model.into(),
        })
    }

    /// Model name in use.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Classifier for OllamaClassifier {
    async fn classify(&self, title: &str, notes: &str) -> Result<bool> {
        let payload = json!({
            "model": self.model,
            "prompt": build_prompt(title, notes),
            "stream": false,
            "options": { "temperature": 0.0 },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&payload)
            .send()
            .await
            .map_err(|source| ClassifierError::Request {
                url: self.url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status { status, body });
        }

        #[derive(serde::Deserialize)]
        struct Response {
            #[serde(default)]
            response: String,
        }

        let body: Response = response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;

        let keep = parse_answer(&body.response);
        debug!(title, keep, "Classified task");
        Ok(keep)
    }
}
