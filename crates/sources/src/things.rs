//! Things 3 source.
//!
//! Open to-dos are read straight from the Things SQLite database (read-only).
//! Completions are written through the `things:///update` URL scheme, which
//! requires the auth token from Things' settings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Url;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use todosync_core::{Source, TaskBuilder};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{CompletionWriter, FetchOutcome, Fetcher, Result, SourceError};

const GROUP_CONTAINER: &str = "Library/Group Containers/JLMPQHK86H.com.culturedcode.ThingsMac";
const DATABASE_FILE: &str = "Things Database.thingsdatabase/main.sqlite";

// Open, untrashed to-dos whose project (direct or via heading), if any, is itself open.
const TODOS_SQL: &str = r#"
SELECT t.uuid, t.title, t.notes, COALESCE(t.project, h.project) AS project, t.area, t.deadline
FROM TMTask t
LEFT JOIN TMTask h ON h.uuid = t.heading
LEFT JOIN TMTask p ON p.uuid = COALESCE(t.project, h.project)
WHERE t.type = 0 AND t.status = 0 AND t.trashed = 0
  AND (p.uuid IS NULL OR (p.status = 0 AND p.trashed = 0))
ORDER BY t."index"
"#;

const PROJECTS_SQL: &str = "SELECT uuid, title, area FROM TMTask WHERE type = 1";
const AREAS_SQL: &str = "SELECT uuid, title FROM TMArea";
const TAGS_SQL: &str =
    "SELECT tt.tasks, tg.title FROM TMTaskTag tt JOIN TMTag tg ON tg.uuid = tt.tags";

type TodoRow = (String, Option<String>, Option<String>, Option<String>, Option<String>, Option<i64>);

/// Locate the Things 3 database under the user's home directory.
pub fn default_database_path() -> Option<PathBuf> {
    let container = dirs::home_dir()?.join(GROUP_CONTAINER);

    // Things 3.15+ keeps the database in a ThingsData-XXXXX folder.
    if let Ok(entries) = std::fs::read_dir(&container) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("ThingsData-") {
                let candidate = entry.path().join(DATABASE_FILE);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
    }

    let legacy = container.join(DATABASE_FILE);
    legacy.exists().then_some(legacy)
}

/// Decode Things' packed date integer (`year << 16 | month << 12 | day << 7`).
pub fn decode_things_date(packed: i64) -> Option<NaiveDate> {
    let year = (packed >> 16) as i32;
    let month = ((packed >> 12) & 0xF) as u32;
    let day = ((packed >> 7) & 0x1F) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Reads open to-dos from the Things database.
#[derive(Debug, Clone)]
pub struct ThingsReader {
    database: Option<PathBuf>,
    areas: Vec<String>,
    source_tag: String,
}

impl ThingsReader {
    /// Reader for the database at `database`, or the default location when `None`.
    pub fn new(database: Option<PathBuf>) -> Self {
        Self {
            database,
            areas: Vec::new(),
            source_tag: Source::Things3.as_str().to_string(),
        }
    }

    /// Only import to-dos in these areas (by title). Empty imports everything.
    pub fn with_areas(mut self, areas: Vec<String>) -> Self {
        self.areas = areas;
        self
    }

    /// Tag added to every imported task.
    pub fn with_source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = tag.into();
        self
    }

    fn database_path(&self) -> Result<PathBuf> {
        self.database
            .clone()
            .or_else(default_database_path)
            .ok_or_else(|| SourceError::NotConfigured("Things 3 database not found.".to_string()))
    }

    async fn read(&self, path: &Path) -> Result<FetchOutcome> {
        let options = SqliteConnectOptions::new().filename(path).read_only(true);
        let mut conn = SqliteConnection::connect_with(&options).await?;

        let todos: Vec<TodoRow> = sqlx::query_as(TODOS_SQL).fetch_all(&mut conn).await?;
        let projects: Vec<(String, Option<String>, Option<String>)> =
            sqlx::query_as(PROJECTS_SQL).fetch_all(&mut conn).await?;
        let areas: HashMap<String, String> = sqlx::query_as::<_, (String, Option<String>)>(AREAS_SQL)
            .fetch_all(&mut conn)
            .await?
            .into_iter()
            .filter_map(|(uuid, title)| title.map(|t| (uuid, t)))
            .collect();
        let tag_rows: Vec<(String, Option<String>)> =
            sqlx::query_as(TAGS_SQL).fetch_all(&mut conn).await?;
        conn.close().await?;

        let mut tags: HashMap<String, Vec<String>> = HashMap::new();
        for (task, title) in tag_rows {
            if let Some(title) = title {
                tags.entry(task).or_default().push(title);
            }
        }
        let projects: HashMap<String, (Option<String>, Option<String>)> = projects
            .into_iter()
            .map(|(uuid, title, area)| (uuid, (title, area)))
            .collect();

        let mut result = FetchOutcome::new();
        for (uuid, title, notes, project, area, deadline) in todos {
            let project_entry = project.as_ref().and_then(|p| projects.get(p));
            // A to-do inside a project inherits the project's area.
            let area_title = area
                .as_ref()
                .or_else(|| project_entry.and_then(|(_, a)| a.as_ref()))
                .and_then(|a| areas.get(a));

            if !self.areas.is_empty()
                && !area_title.is_some_and(|a| self.areas.iter().any(|f| f == a))
            {
                continue;
            }

            let project_name = project_entry
                .and_then(|(t, _)| t.clone())
                .or_else(|| area_title.cloned());

            let mut builder = TaskBuilder::new(Source::Things3, uuid.clone(), title.unwrap_or_default())
                .source_tag(self.source_tag.clone())
                .tags(tags.remove(&uuid).unwrap_or_default())
                .project(project_name)
                .due(deadline.and_then(decode_things_date));
            if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
                builder = builder.annotation(notes);
            }

            match builder.build() {
                Ok(task) => result.push(task),
                Err(e) => {
                    warn!(uuid = %uuid, error = %e, "Skipping Things to-do");
                    result.skip(uuid);
                }
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl Fetcher for ThingsReader {
    fn source(&self) -> Source {
        Source::Things3
    }

    async fn fetch(&self) -> Result<FetchOutcome> {
        let path = self.database_path()?;
        debug!(path = %path.display(), "Reading Things database");
        self.read(&path).await
    }
}

/// Completes Things to-dos through the `things:///update` URL scheme.
#[derive(Debug, Clone)]
pub struct ThingsUrlWriter {
    auth_token: String,
    opener: String,
}

impl ThingsUrlWriter {
    /// Writer using the Things URL-scheme auth token.
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            opener: "open".to_string(),
        }
    }

    /// Program used to open URLs (defaults to macOS `open`).
    pub fn with_opener(mut self, opener: impl Into<String>) -> Self {
        self.opener = opener.into();
        self
    }

    /// URL completing the to-do `id`.
    pub fn update_url(&self, id: &str) -> Result<Url> {
        Url::parse_with_params(
            "things:///update",
            &[
                ("id", id),
                ("completed", "true"),
                ("auth-token", self.auth_token.as_str()),
            ],
        )
        .map_err(|e| SourceError::Other(format!("invalid Things URL: {e}")))
    }
}

#[async_trait]
impl CompletionWriter for ThingsUrlWriter {
    fn source(&self) -> Source {
        Source::Things3
    }

    async fn complete(&self, identity: &str) -> Result<()> {
        if self.auth_token.trim().is_empty() {
            return Err(SourceError::NotConfigured(
                "Things auth token not configured (things.auth_token).".to_string(),
            ));
        }

        let url = self.update_url(identity)?;
        // -g keeps Things in the background.
        let status = Command::new(&self.opener)
            .arg("-g")
            .arg(url.as_str())
            .status()
            .await?;

        if !status.success() {
            return Err(SourceError::Command {
                command: self.opener.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}
