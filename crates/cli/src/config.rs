//! Configuration file: `config.toml` in the todo-sync config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use todosync_classifier::ollama::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT};
use todosync_sources::DEFAULT_ASANA_URL;
use todosync_storage::TaskwarriorStore;

/// Placeholder token written by older starter configs.
const PLACEHOLDER_TOKEN: &str = "YOUR_TOKEN_HERE";

/// Errors loading or writing the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Config directory.
///
/// `dirs::config_dir()/todo-sync/` by default, overridden by `TODO_SYNC_CONFIG_DIR`.
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("TODO_SYNC_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .map(|d| d.join("todo-sync"))
        .unwrap_or_else(|| PathBuf::from(".todo-sync"))
}

/// Main config file path (`config_dir()/config.toml`).
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Full configuration. Every section falls back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Asana connection
    pub asana: AsanaConfig,
    /// Things 3 database and URL scheme
    pub things: ThingsConfig,
    /// Local store and tagging
    pub sync: SyncConfig,
    /// Relevance classifier
    pub ollama: OllamaConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AsanaConfig {
    pub personal_access_token: String,
    /// Workspace gid; empty = the account's only workspace
    pub workspace: String,
    pub base_url: String,
}

impl Default for AsanaConfig {
    fn default() -> Self {
        Self {
            personal_access_token: String::new(),
            workspace: String::new(),
            base_url: DEFAULT_ASANA_URL.to_string(),
        }
    }
}

impl AsanaConfig {
    /// True once a real token has been set.
    pub fn is_configured(&self) -> bool {
        let token = self.personal_access_token.trim();
        !token.is_empty() && token != PLACEHOLDER_TOKEN
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThingsConfig {
    pub enabled: bool,
    /// Area titles to import; empty = all
    pub areas: Vec<String>,
    /// Database file; discovered when unset
    pub database_path: Option<PathBuf>,
    /// URL-scheme token, required to push completions
    pub auth_token: String,
}

impl Default for ThingsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            areas: Vec::new(),
            database_path: None,
            auth_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub things_tag: String,
    pub asana_tag: String,
    pub push_delay_ms: u64,
    /// Taskwarrior executable
    pub task_binary: PathBuf,
    /// Overrides `data.location` for every Taskwarrior call
    pub data_location: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            things_tag: "things3".to_string(),
            asana_tag: "asana".to_string(),
            push_delay_ms: 250,
            task_binary: PathBuf::from("task"),
            data_location: None,
        }
    }
}

impl SyncConfig {
    /// Taskwarrior store honouring `task_binary` and `data_location`.
    pub fn task_store(&self) -> TaskwarriorStore {
        let store = TaskwarriorStore::new(&self.task_binary);
        match &self.data_location {
            Some(dir) => store.with_override("data.location", &dir.to_string_lossy()),
            None => store,
        }
    }

    pub fn push_delay(&self) -> Duration {
        Duration::from_millis(self.push_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub enabled: bool,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl OllamaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load from `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Load from an existing TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Write a commented starter config to `path`, creating parent directories.
pub fn create_default_config(path: &Path, asana_token: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let token = toml::Value::String(asana_token.trim().to_string());
    let content = format!(
        r#"[asana]
personal_access_token = {token}
# workspace = ""

[things]
enabled = true
# areas = []
# auth_token = ""

[sync]
things_tag = "things3"
asana_tag = "asana"
# push_delay_ms = 250

[ollama]
enabled = true
model = "{DEFAULT_MODEL}"
# base_url = "{DEFAULT_BASE_URL}"
"#
    );
    std::fs::write(path, content)?;
    Ok(())
}
