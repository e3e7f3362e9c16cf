//! # rescuegraph
//!
//! Drive rescue dispatch workflows from the command line: start an incident,
//! answer its approval prompt, inspect checkpoints and recover or cancel instances.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rescuegraph_cli::{config, App, CliConfig, IncidentFile};
use rescuegraph_core::{Durability, InstanceStatus};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rescuegraph")]
#[command(about = "rescuegraph - Durable rescue dispatch workflows", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./rescuegraph.toml when present)
    #[arg(short, long, global = true, env = "RESCUEGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file; overrides the configured database url
    #[arg(long, global = true, env = "RESCUEGRAPH_DB")]
    db: Option<PathBuf>,

    /// Print JSON on one line
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample config and incident file
    Init {
        /// Target directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Start a dispatch workflow for an incident file
    Start {
        /// Incident JSON: task, candidates and optional ids
        file: PathBuf,

        /// Instance id (defaults to a generated UUID)
        #[arg(short, long)]
        id: Option<String>,

        /// Durability mode: sync, async or exit
        #[arg(short, long)]
        durability: Option<Durability>,
    },

    /// Approve units for a suspended instance
    Resume {
        instance_id: String,

        /// Approved unit id; repeat for several units
        #[arg(long = "choice", required = true)]
        choices: Vec<String>,
    },

    /// Continue a running instance orphaned by a crash
    Recover { instance_id: String },

    /// Show status, state and pending ticket
    Status { instance_id: String },

    /// Show the checkpoint chain
    History {
        instance_id: String,

        /// Include recorded external call results
        #[arg(long)]
        effects: bool,
    },

    /// Cancel a running or suspended instance
    Cancel { instance_id: String },

    /// List instances
    List {
        #[arg(short, long)]
        namespace: Option<String>,

        /// running, suspended, completed or failed
        #[arg(short, long)]
        status: Option<InstanceStatus>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(rust_log)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Init { path } = &cli.command {
        return init_project(path);
    }

    let config_path = cli.config.clone().or_else(config::default_config_path);
    let mut settings = CliConfig::load(config_path.as_deref())?;
    if let Some(db) = &cli.db {
        settings = settings.with_database(db);
    }
    tracing::debug!(config = ?config_path, "Configuration loaded");

    let app = App::connect(settings).await?;
    let output = match cli.command {
        Commands::Init { .. } => return Ok(()),
        Commands::Start {
            file,
            id,
            durability,
        } => app.start(IncidentFile::read(&file)?, id, durability).await?,
        Commands::Resume {
            instance_id,
            choices,
        } => app.resume(&instance_id, &choices).await?,
        Commands::Recover { instance_id } => app.recover(&instance_id).await?,
        Commands::Status { instance_id } => app.status(&instance_id).await?,
        Commands::History {
            instance_id,
            effects,
        } => app.history(&instance_id, effects).await?,
        Commands::Cancel { instance_id } => app.cancel(&instance_id).await?,
        Commands::List { namespace, status } => app.list(namespace.as_deref(), status).await?,
    };

    print_json(&output, cli.compact)
}

fn print_json(value: &Value, compact: bool) -> Result<()> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", text);
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"[engine]
default_durability = "sync"
database_url = "sqlite://rescuegraph.db"

[dispatch]
max_dispatch_retries = 3
shortlist_size = 3

[limits]
default = 8
devices = 2

[[places]]
name = "North Harbor"
lat = 47.6205
lng = -122.3493
"#;

const SAMPLE_INCIDENT: &str = r#"{
  "task_id": "flood-001",
  "task": {
    "description": "Family stranded on a roof after flooding",
    "required_capabilities": ["water_rescue"],
    "address": "North Harbor"
  },
  "candidates": [
    {"id": "boat-1", "capabilities": ["water_rescue"], "location": {"lat": 47.61, "lng": -122.35}},
    {"id": "heli-2", "capabilities": ["air_lift", "water_rescue"], "location": {"lat": 47.45, "lng": -122.30}},
    {"id": "truck-3", "capabilities": ["ground_transport"], "location": {"lat": 47.62, "lng": -122.34}}
  ]
}
"#;

fn init_project(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    for (name, contents) in [
        ("rescuegraph.toml", SAMPLE_CONFIG),
        ("incident.json", SAMPLE_INCIDENT),
    ] {
        let target = path.join(name);
        if target.exists() {
            println!("Skipping existing {}", target.display());
            continue;
        }
        std::fs::write(&target, contents)?;
        println!("Created {}", target.display());
    }
    Ok(())
}
