//! Taskwarrior store.
//!
//! Drives the `task` binary directly with typed argv; nothing goes through a
//! shell. Titles and annotations are always passed after `--` so their text is
//! never parsed as attributes or filters. Reads go through `task export`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use todosync_core::{IdentityField, LocalId, LocalTaskRecord, Priority, Source, TaskStatus};
use tokio::process::Command;
use tracing::{debug, info};

use super::{FieldChange, NewTask, Result, StoreError, TaskStore};

/// A user-defined attribute the sync needs in the Taskwarrior config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uda {
    /// Attribute name
    pub name: &'static str,
    /// Taskwarrior type (`string`, `numeric`)
    pub uda_type: &'static str,
    /// Report label
    pub label: &'static str,
}

/// UDAs that must exist for sync to work.
pub const REQUIRED_UDAS: &[Uda] = &[
    Uda { name: "things3_uuid", uda_type: "string", label: "Things 3 UUID" },
    Uda { name: "asana_gid", uda_type: "string", label: "Asana GID" },
    Uda { name: "source", uda_type: "string", label: "Sync source" },
    Uda { name: "things3_synced", uda_type: "numeric", label: "Synced to Things 3" },
    Uda { name: "asana_synced", uda_type: "numeric", label: "Synced to Asana" },
];

/// Store backed by the Taskwarrior command line.
#[derive(Debug, Clone)]
pub struct TaskwarriorStore {
    binary: PathBuf,
    overrides: Vec<String>,
}

impl Default for TaskwarriorStore {
    fn default() -> Self {
        Self::new("task")
    }
}

impl TaskwarriorStore {
    /// Use the given `task` binary.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            overrides: Vec::new(),
        }
    }

    /// Add an `rc.<key>=<value>` override to every invocation.
    pub fn with_override(mut self, key: &str, value: &str) -> Self {
        self.overrides.push(format!("rc.{key}={value}"));
        self
    }

    fn base_args(&self, verbose: &str) -> Vec<String> {
        let mut args = vec![
            "rc.confirmation=off".to_string(),
            "rc.bulk=0".to_string(),
            "rc.json.array=on".to_string(),
            format!("rc.verbose={verbose}"),
        ];
        args.extend(self.overrides.iter().cloned());
        args
    }

    async fn run(&self, command: &str, verbose: &str, args: Vec<String>) -> Result<String> {
        debug!(command, ?args, "task");

        let output = Command::new(&self.binary)
            .args(self.base_args(verbose))
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(StoreError::Command {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn export(&self, mut filter: Vec<String>) -> Result<Vec<LocalTaskRecord>> {
        filter.push("export".to_string());
        let out = self.run("export", "nothing", filter).await?;
        parse_export(&out)
    }

    /// Configure any missing [`REQUIRED_UDAS`]. Returns the names created.
    pub async fn ensure_udas(&self) -> Result<Vec<&'static str>> {
        let shown = self.run("show", "nothing", vec!["show".to_string()]).await?;

        let mut created = Vec::new();
        for uda in missing_udas(&shown) {
            for (key, value) in [("type", uda.uda_type), ("label", uda.label)] {
                let args = vec![
                    "config".to_string(),
                    format!("uda.{}.{key}", uda.name),
                    value.to_string(),
                ];
                self.run("config", "nothing", args).await?;
            }
            info!(uda = uda.name, "Configured Taskwarrior UDA");
            created.push(uda.name);
        }
        Ok(created)
    }
}

#[async_trait]
impl TaskStore for TaskwarriorStore {
    async fn find_by_identity(
        &self,
        field: IdentityField,
        value: &str,
        status: TaskStatus,
    ) -> Result<Option<LocalTaskRecord>> {
        let records = self.export(find_filter(field, value, status)).await?;
        // `.is` is exact in Taskwarrior, but keep the check local too.
        Ok(records
            .into_iter()
            .find(|r| r.status == status && r.identity(field) == Some(value)))
    }

    async fn list_pending_by_identity_field(
        &self,
        field: IdentityField,
    ) -> Result<Vec<(String, LocalId)>> {
        let filter = vec![
            "(".to_string(),
            "status:pending".to_string(),
            "or".to_string(),
            "status:waiting".to_string(),
            ")".to_string(),
            format!("{field}.any:"),
        ];
        let records = self.export(filter).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.status.is_open())
            .filter_map(|r| {
                let value = r.identity(field)?.to_string();
                Some((value, r.local_id))
            })
            .collect())
    }

    async fn list_completed_by_identity_field(
        &self,
        field: IdentityField,
    ) -> Result<Vec<LocalTaskRecord>> {
        let filter = vec!["status:completed".to_string(), format!("{field}.any:")];
        let records = self.export(filter).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.status == TaskStatus::Completed && r.identity(field).is_some())
            .collect())
    }

    async fn create(&mut self, task: &NewTask) -> Result<LocalId> {
        let out = self.run("add", "new-uuid", create_args(task)).await?;
        parse_created_uuid(&out)
    }

    async fn modify(&mut self, id: &LocalId, changes: &[FieldChange]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        self.run("modify", "nothing", modify_args(id, changes)).await?;
        Ok(())
    }

    async fn annotate(&mut self, id: &LocalId, text: &str) -> Result<()> {
        let args = vec![
            id.to_string(),
            "annotate".to_string(),
            "--".to_string(),
            text.to_string(),
        ];
        self.run("annotate", "nothing", args).await?;
        Ok(())
    }

    async fn set_dependency(&mut self, dependent: &LocalId, dependency: &LocalId) -> Result<()> {
        let args = vec![
            dependent.to_string(),
            "modify".to_string(),
            format!("depends:{dependency}"),
        ];
        self.run("modify", "nothing", args).await?;
        Ok(())
    }

    async fn complete(&mut self, id: &LocalId) -> Result<()> {
        self.run("done", "nothing", vec![id.to_string(), "done".to_string()])
            .await?;
        Ok(())
    }

    async fn mark_synced(&mut self, id: &LocalId, field: IdentityField) -> Result<()> {
        let args = vec![
            id.to_string(),
            "modify".to_string(),
            format!("{}:1", field.synced_attribute()),
        ];
        self.run("modify", "nothing", args).await?;
        Ok(())
    }
}

fn find_filter(field: IdentityField, value: &str, status: TaskStatus) -> Vec<String> {
    vec![format!("status:{status}"), format!("{field}.is:{value}")]
}

fn create_args(task: &NewTask) -> Vec<String> {
    let mut args = vec![
        "add".to_string(),
        format!("{}:{}", task.identity.field, task.identity.value),
        format!("source:{}", task.source),
    ];
    if let Some(project) = &task.project {
        args.push(format!("project:{project}"));
    }
    if let Some(due) = task.due {
        args.push(format!("due:{}", due.format("%Y-%m-%d")));
    }
    if let Some(priority) = task.priority {
        args.push(format!("priority:{priority}"));
    }
    args.extend(task.tags.iter().map(|t| format!("+{t}")));
    args.push("--".to_string());
    args.push(task.description.clone());
    args
}

fn modify_args(id: &LocalId, changes: &[FieldChange]) -> Vec<String> {
    let mut args = vec![id.to_string(), "modify".to_string()];
    let mut description = None;

    for change in changes {
        match change {
            FieldChange::Description(d) => description = Some(d.clone()),
            FieldChange::Project(p) => args.push(format!("project:{p}")),
            FieldChange::Due(d) => args.push(format!("due:{}", d.format("%Y-%m-%d"))),
            FieldChange::Priority(p) => args.push(format!("priority:{p}")),
            FieldChange::Tags { added, removed } => {
                args.extend(added.iter().map(|t| format!("+{t}")));
                args.extend(removed.iter().map(|t| format!("-{t}")));
            }
        }
    }

    // Bare words after `--` replace the description.
    if let Some(description) = description {
        args.push("--".to_string());
        args.push(description);
    }
    args
}

fn created_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Created task ([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})")
            .unwrap_or_else(|e| panic!("invalid created-task pattern: {e}"))
    })
}

/// Pull the new task's UUID out of `task add` output (`rc.verbose=new-uuid`).
pub fn parse_created_uuid(output: &str) -> Result<LocalId> {
    created_regex()
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| LocalId::new(m.as_str().to_lowercase()))
        .ok_or_else(|| StoreError::Parse(format!("no task UUID in add output: {}", output.trim())))
}

/// Names of required UDAs absent from `task show` output.
pub fn missing_udas(show_output: &str) -> Vec<&'static Uda> {
    REQUIRED_UDAS
        .iter()
        .filter(|uda| !show_output.contains(&format!("uda.{}.type", uda.name)))
        .collect()
}

/// One task from `task export`.
#[derive(Debug, Deserialize)]
struct ExportedTask {
    uuid: String,
    description: String,
    status: String,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    due: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    annotations: Vec<ExportedAnnotation>,
    #[serde(default)]
    depends: Option<serde_json::Value>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    things3_uuid: Option<String>,
    #[serde(default)]
    asana_gid: Option<String>,
    #[serde(default)]
    things3_synced: Option<serde_json::Value>,
    #[serde(default)]
    asana_synced: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ExportedAnnotation {
    description: String,
}

impl ExportedTask {
    fn into_record(self) -> Result<LocalTaskRecord> {
        let status = match self.status.as_str() {
            "pending" => TaskStatus::Pending,
            "waiting" => TaskStatus::Waiting,
            "completed" => TaskStatus::Completed,
            other => {
                return Err(StoreError::Parse(format!(
                    "task {} has unsupported status {other}",
                    self.uuid
                )))
            }
        };

        let mut record = LocalTaskRecord::new(LocalId::new(self.uuid), self.description);
        record.status = status;
        record.source = self.source.as_deref().and_then(|s| s.parse::<Source>().ok());
        record.things3_uuid = self.things3_uuid.filter(|v| !v.is_empty());
        record.asana_gid = self.asana_gid.filter(|v| !v.is_empty());
        record.things3_synced = self.things3_synced.as_ref().is_some_and(is_truthy);
        record.asana_synced = self.asana_synced.as_ref().is_some_and(is_truthy);
        record.tags = self.tags.into_iter().collect();
        record.project = self.project.filter(|p| !p.is_empty());
        record.due = self.due.as_deref().map(parse_due).transpose()?;
        record.priority = self.priority.as_deref().and_then(Priority::from_code);
        record.annotations = self.annotations.into_iter().map(|a| a.description).collect();
        record.depends = parse_depends(self.depends.as_ref())
            .into_iter()
            .map(LocalId::new)
            .collect();
        Ok(record)
    }
}

/// Parse `task export` output into records.
pub fn parse_export(json: &str) -> Result<Vec<LocalTaskRecord>> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let tasks: Vec<ExportedTask> = serde_json::from_str(trimmed)?;
    tasks.into_iter().map(ExportedTask::into_record).collect()
}

// Taskwarrior stores dates in UTC; `due:YYYY-MM-DD` is local midnight.
fn parse_due(raw: &str) -> Result<NaiveDate> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%SZ")
        .map_err(|e| StoreError::Parse(format!("due {raw}: {e}")))?;
    Ok(Utc
        .from_utc_datetime(&naive)
        .with_timezone(&Local)
        .date_naive())
}

// 2.x exports a comma-separated string, 3.x an array.
fn parse_depends(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::String(s) => matches!(s.trim(), "1" | "yes" | "true"),
        _ => false,
    }
}
