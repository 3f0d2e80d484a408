//! todo-sync CLI - sync Things 3 and Asana with Taskwarrior.

mod config;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use todosync_classifier::{Classifier, OllamaClassifier};
use todosync_core::Source;
use todosync_sources::{AsanaClient, ThingsReader, ThingsUrlWriter};
use todosync_storage::TaskwarriorStore;
use todosync_sync::{SyncConfig, SyncEngine};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{create_default_config, default_config_path, Config};

#[derive(Parser)]
#[command(name = "todo-sync")]
#[command(about = "Sync Things 3 and Asana tasks with Taskwarrior", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Taskwarrior UDAs and write a starter config
    Setup {
        /// Asana personal access token for the starter config
        #[arg(long)]
        asana_token: Option<String>,
    },
    /// Import tasks from Things 3
    Things {
        /// Log changes without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Import tasks from Asana
    Asana {
        /// Log changes without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Import tasks from both sources
    All {
        /// Log changes without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Push local completions back to the sources
    Push {
        /// Only this source (things or asana)
        #[arg(long)]
        source: Option<Source>,
        /// Log changes without applying them
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = default_config_path();
    debug!(path = %config_path.display(), "Using config");

    match cli.command {
        Commands::Setup { asana_token } => setup(&config_path, asana_token).await?,
        Commands::Things { dry_run } => {
            let config = load(&config_path)?;
            if !config.things.enabled {
                println!("Things 3 sync is disabled in config.");
                return Ok(());
            }
            let mut engine = engine(&config, dry_run);
            pull_things(&mut engine, &config).await;
        }
        Commands::Asana { dry_run } => {
            let config = load(&config_path)?;
            let mut engine = engine(&config, dry_run);
            pull_asana(&mut engine, &config).await;
        }
        Commands::All { dry_run } => {
            let config = load(&config_path)?;
            let mut engine = engine(&config, dry_run);

            if config.things.enabled {
                pull_things(&mut engine, &config).await;
            } else {
                println!("Things 3 sync is disabled in config, skipping.");
            }

            if config.asana.is_configured() {
                pull_asana(&mut engine, &config).await;
            } else {
                println!("Asana not configured, skipping.");
            }
        }
        Commands::Push { source, dry_run } => {
            let config = load(&config_path)?;
            let mut engine = engine(&config, dry_run);
            let sources = match source {
                Some(source) => vec![source],
                None => Source::ALL.to_vec(),
            };
            for source in sources {
                push(&mut engine, &config, source).await;
            }
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn engine(config: &Config, dry_run: bool) -> SyncEngine<TaskwarriorStore> {
    if dry_run {
        info!("Dry run: no changes will be made");
    }
    SyncEngine::new(config.sync.task_store()).with_config(SyncConfig {
        dry_run,
        push_delay: config.sync.push_delay(),
    })
}

async fn setup(config_path: &Path, asana_token: Option<String>) -> Result<()> {
    println!("=== todo-sync setup ===\n");

    let config = load(config_path)?;
    println!("Configuring Taskwarrior UDAs...");
    let store = config.sync.task_store();
    let created = store
        .ensure_udas()
        .await
        .context("Failed to configure Taskwarrior UDAs")?;
    if created.is_empty() {
        println!("  UDAs already configured.");
    } else {
        println!("  Created UDAs: {}", created.join(", "));
    }

    if config_path.exists() {
        println!("\nConfig file already exists. Edit it at:");
        println!("  {}", config_path.display());
    } else {
        let token = asana_token.unwrap_or_default();
        create_default_config(config_path, &token)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("\nConfig created at: {}", config_path.display());
        if token.is_empty() {
            println!("To sync Asana, create a Personal Access Token at");
            println!("  https://app.asana.com/0/my-apps");
            println!("and set personal_access_token in the [asana] section.");
        }
    }

    println!("\nSetup complete! Try running:");
    println!("  todo-sync things   # import from Things 3");
    println!("  todo-sync asana    # import from Asana");
    println!("  todo-sync all      # import from both");
    Ok(())
}

async fn pull_things(engine: &mut SyncEngine<TaskwarriorStore>, config: &Config) {
    let reader = ThingsReader::new(config.things.database_path.clone())
        .with_areas(config.things.areas.clone())
        .with_source_tag(config.sync.things_tag.clone());

    let classifier = if config.ollama.enabled {
        match OllamaClassifier::new(
            config.ollama.base_url.clone(),
            config.ollama.model.clone(),
            config.ollama.timeout(),
        ) {
            Ok(classifier) => Some(classifier),
            Err(e) => {
                warn!("Classifier unavailable ({}), importing all tasks unfiltered", e);
                None
            }
        }
    } else {
        None
    };
    if let Some(classifier) = &classifier {
        println!("Filtering Things 3 tasks through Ollama ({})...", classifier.model());
    }

    let report = engine
        .pull(&reader, classifier.as_ref().map(|c| c as &dyn Classifier))
        .await;
    println!("{}", report.summary());
}

async fn pull_asana(engine: &mut SyncEngine<TaskwarriorStore>, config: &Config) {
    let client = match asana_client(config) {
        Ok(client) => client
            .with_workspace(config.asana.workspace.clone())
            .with_source_tag(config.sync.asana_tag.clone()),
        Err(e) => {
            println!("Asana: {e}");
            return;
        }
    };

    let report = engine.pull(&client, None).await;
    println!("{}", report.summary());
}

fn asana_client(config: &Config) -> todosync_sources::Result<AsanaClient> {
    AsanaClient::new(
        config.asana.base_url.clone(),
        config.asana.personal_access_token.trim(),
    )
}

async fn push(engine: &mut SyncEngine<TaskwarriorStore>, config: &Config, source: Source) {
    let report = match source {
        Source::Things3 => {
            if config.things.auth_token.trim().is_empty() {
                println!("Things 3 auth_token not configured, skipping push.");
                return;
            }
            engine
                .push(&ThingsUrlWriter::new(config.things.auth_token.trim()))
                .await
        }
        Source::Asana => {
            if !config.asana.is_configured() {
                println!("Asana not configured, skipping push.");
                return;
            }
            let client = match asana_client(config) {
                Ok(client) => client,
                Err(e) => {
                    println!("Asana push: {e}");
                    return;
                }
            };
            engine.push(&client).await
        }
    };
    println!("{}", report.summary(source.display_name()));
}
