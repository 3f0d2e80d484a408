//! Asana REST client: fetches the user's open tasks and completes tasks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use todosync_core::{CanonicalTask, Source, TaskBuilder};
use tracing::{debug, warn};

use crate::{CompletionWriter, FetchOutcome, Fetcher, Result, SourceError};

/// Public Asana API root.
pub const DEFAULT_ASANA_URL: &str = "https://app.asana.com/api/1.0";

const OPT_FIELDS: &str =
    "gid,name,completed,due_on,tags,tags.name,projects,projects.name,notes,parent,parent.gid";

const PAGE_SIZE: u32 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Asana API client.
#[derive(Clone)]
pub struct AsanaClient {
    /// HTTP client
    client: Client,

    /// API root
    base_url: String,

    /// Personal access token
    token: String,

    /// Workspace gid; auto-detected when `None`
    workspace: Option<String>,

    /// Tag added to every imported task
    source_tag: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    next_page: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    offset: String,
}

#[derive(Debug, Deserialize)]
struct Workspace {
    gid: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct TaskList {
    gid: String,
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ParentRef {
    gid: String,
}

/// A task as returned by the Asana API.
#[derive(Debug, Deserialize)]
struct AsanaTask {
    gid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    due_on: Option<String>,
    #[serde(default)]
    tags: Vec<Named>,
    #[serde(default)]
    projects: Vec<Named>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    parent: Option<ParentRef>,
}

impl AsanaClient {
    /// Create a client for `base_url` authenticating with `token`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = ClientBuilder::new().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            workspace: None,
            source_tag: Source::Asana.as_str().to_string(),
        })
    }

    /// Use a fixed workspace instead of auto-detecting one. Blank means auto.
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        let workspace = workspace.into();
        self.workspace = (!workspace.trim().is_empty()).then_some(workspace);
        self
    }

    /// Tag added to every imported task.
    pub fn with_source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = tag.into();
        self
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Envelope<T>> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status { status, body });
        }

        Ok(response.json().await?)
    }

    /// Workspace gid: the configured one, or the account's only workspace.
    pub async fn resolve_workspace(&self) -> Result<String> {
        if let Some(workspace) = &self.workspace {
            return Ok(workspace.clone());
        }

        let workspaces: Vec<Workspace> = self
            .get("/workspaces", &[("limit", "10".to_string())])
            .await?
            .data;

        match workspaces.as_slice() {
            [] => Err(SourceError::Other(
                "No Asana workspaces found for this account.".to_string(),
            )),
            [only] => Ok(only.gid.clone()),
            many => {
                let names: Vec<_> = many.iter().map(|w| w.name.as_str()).collect();
                Err(SourceError::Other(format!(
                    "Multiple workspaces found ({}). Set 'workspace' in your config to pick one.",
                    names.join(", ")
                )))
            }
        }
    }

    async fn open_tasks(&self, workspace: &str) -> Result<Vec<AsanaTask>> {
        let list: TaskList = self
            .get("/users/me/user_task_list", &[("workspace", workspace.to_string())])
            .await?
            .data;

        let path = format!("/user_task_lists/{}/tasks", list.gid);
        let mut tasks = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query = vec![
                ("opt_fields", OPT_FIELDS.to_string()),
                ("completed_since", "now".to_string()),
                ("limit", PAGE_SIZE.to_string()),
            ];
            if let Some(offset) = &offset {
                query.push(("offset", offset.clone()));
            }

            let page: Envelope<Vec<AsanaTask>> = self.get(&path, &query).await?;
            debug!(count = page.data.len(), "Fetched Asana page");
            tasks.extend(page.data);

            match page.next_page {
                Some(next) => offset = Some(next.offset),
                None => break,
            }
        }

        Ok(tasks)
    }

    fn to_canonical(&self, task: AsanaTask) -> Result<CanonicalTask> {
        let due = task
            .due_on
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        let project = task
            .projects
            .into_iter()
            .find_map(|p| p.name.filter(|n| !n.is_empty()));

        let mut builder = TaskBuilder::new(Source::Asana, task.gid, task.name)
            .source_tag(self.source_tag.clone())
            .tags(task.tags.into_iter().filter_map(|t| t.name))
            .project(project)
            .due(due)
            .parent(task.parent.map(|p| p.gid));
        if let Some(notes) = task.notes.filter(|n| !n.trim().is_empty()) {
            builder = builder.annotation(notes);
        }

        Ok(builder.build()?)
    }
}

#[async_trait]
impl Fetcher for AsanaClient {
    fn source(&self) -> Source {
        Source::Asana
    }

    async fn fetch(&self) -> Result<FetchOutcome> {
        if self.token.is_empty() || self.token == "YOUR_TOKEN_HERE" {
            return Err(SourceError::NotConfigured(
                "Asana personal access token not configured. Run 'todo-sync setup' or edit the config file."
                    .to_string(),
            ));
        }

        let workspace = self.resolve_workspace().await?;
        let raw = self.open_tasks(&workspace).await?;

        let mut outcome = FetchOutcome::new();
        for task in raw.into_iter().filter(|t| !t.completed) {
            let gid = task.gid.clone();
            match self.to_canonical(task) {
                Ok(task) => outcome.push(task),
                Err(e) => {
                    warn!(gid = %gid, error = %e, "Skipping Asana task");
                    outcome.skip(gid);
                }
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl CompletionWriter for AsanaClient {
    fn source(&self) -> Source {
        Source::Asana
    }

    async fn complete(&self, identity: &str) -> Result<()> {
        let response = self
            .client
            .put(format!("{}/tasks/{}", self.base_url, identity))
            .bearer_auth(&self.token)
            .json(&json!({ "data": { "completed": true } }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status { status, body });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_task_list(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/users/me/user_task_list"))
            .and(query_param("workspace", "ws1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"gid": "utl1"}})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_paginates_and_normalizes() {
        let server = MockServer::start().await;
        mount_task_list(&server).await;

        Mock::given(method("GET"))
            .and(path("/user_task_lists/utl1/tasks"))
            .and(query_param("offset", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"gid": "3", "name": "Sub task", "completed": false, "parent": {"gid": "1"}},
                    {"gid": "4", "name": "   ", "completed": false}
                ],
                "next_page": null
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/user_task_lists/utl1/tasks"))
            .and(header("authorization", "Bearer pat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"gid": "1", "name": "Write report", "completed": false, "due_on": "2025-06-01",
                     "tags": [{"name": "deep work"}], "projects": [{"name": ""}, {"name": "Q3"}],
                     "notes": "outline first"},
                    {"gid": "2", "name": "Old thing", "completed": true}
                ],
                "next_page": {"offset": "page2", "path": "/x", "uri": "http://x"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let client = AsanaClient::new(server.uri(), "pat").unwrap().with_workspace("ws1");
        let outcome = client.fetch().await.unwrap();
        let tasks = &outcome.tasks;

        assert_eq!(tasks.len(), 2);
        let mut seen: Vec<_> = outcome.seen.iter().map(String::as_str).collect();
        seen.sort();
        assert_eq!(seen, vec!["1", "3", "4"]);
        let report = &tasks[0];
        assert_eq!(report.identity.value, "1");
        assert_eq!(report.project.as_deref(), Some("Q3"));
        assert_eq!(report.due, NaiveDate::from_ymd_opt(2025, 6, 1));
        assert!(report.tags.contains("deep_work"));
        assert!(report.tags.contains("asana"));
        assert_eq!(report.annotations, vec!["outline first"]);
        assert!(report.priority.is_none());

        assert_eq!(tasks[1].parent.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_fetch_without_token_is_not_configured() {
        let client = AsanaClient::new("http://127.0.0.1:9", "YOUR_TOKEN_HERE").unwrap();
        assert!(matches!(client.fetch().await, Err(SourceError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_resolve_workspace_rejects_ambiguity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/workspaces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"gid": "a", "name": "Home"}, {"gid": "b", "name": "Work"}]
            })))
            .mount(&server)
            .await;

        let client = AsanaClient::new(server.uri(), "pat").unwrap();
        let err = client.resolve_workspace().await.unwrap_err();
        assert!(err.to_string().contains("Home, Work"));
    }

    #[tokio::test]
    async fn test_complete_puts_completed_flag() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tasks/1201"))
            .and(body_json(json!({"data": {"completed": true}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"gid": "1201"}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = AsanaClient::new(server.uri(), "pat").unwrap();
        client.complete("1201").await.unwrap();
    }

    #[tokio::test]
    async fn test_complete_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tasks/404"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let client = AsanaClient::new(server.uri(), "pat").unwrap();
        let err = client.complete("404").await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 404, .. }));
    }
}
