//! rivven-cosmos - offline tooling for the change-feed source connector
//!
//! # Usage
//!
//! ```bash
//! # Validate configuration
//! rivven-cosmos -c cosmos.yaml validate
//!
//! # Print the configuration JSON schema
//! rivven-cosmos schema
//!
//! # Plan task units for a known inventory
//! rivven-cosmos -c cosmos.yaml plan --inventory inventory.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rivven_cosmos::{encode_task_units, CosmosSourceConfig, DatabaseInventory, TaskPlanner};

#[derive(Parser)]
#[command(name = "rivven-cosmos")]
#[command(version, about = "Change-feed source connector for Rivven")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "cosmos.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    Validate,
    /// Print the configuration JSON schema
    Schema,
    /// Print the task units each task instance would run
    Plan {
        /// Inventory JSON: {"containers": [{"name", "rid", "ranges": ["[,FF)"]}]}
        #[arg(long)]
        inventory: PathBuf,
        /// Emit one encoded task configuration per line instead of pretty JSON
        #[arg(long)]
        encoded: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Schema => show_schema(),
        Commands::Validate => validate_config(&load_config(&cli.config)?),
        Commands::Plan { inventory, encoded } => {
            show_plan(&load_config(&cli.config)?, &inventory, encoded)
        }
    }
}

fn load_config(path: &Path) -> Result<CosmosSourceConfig> {
    CosmosSourceConfig::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn validate_config(config: &CosmosSourceConfig) -> Result<()> {
    println!("Configuration is valid");
    println!("  Connector: {}", config.connector_name);
    println!("  Endpoint:  {}", config.endpoint);
    println!("  Database:  {}", config.database);
    if config.containers.include_all {
        println!("  Containers: all");
    } else {
        println!("  Containers: {}", config.containers.include.join(", "));
    }
    for container in &config.containers.include {
        println!("    {} -> {}", container, config.topic_for(container));
    }
    println!("  Metadata topic: {}", config.metadata.topic);
    println!(
        "  Monitor: {} (every {}ms)",
        if config.metadata.monitor_enabled { "enabled" } else { "disabled" },
        config.metadata.poll_delay_ms
    );
    println!("  Max tasks: {}", config.tasks_max);
    Ok(())
}

fn show_schema() -> Result<()> {
    let schema = schemars::schema_for!(CosmosSourceConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn show_plan(config: &CosmosSourceConfig, inventory: &Path, encoded: bool) -> Result<()> {
    let inventory = DatabaseInventory::from_json_file(inventory)
        .with_context(|| format!("Failed to load inventory from {}", inventory.display()))?;

    let plan = TaskPlanner::new(config).plan_fresh(&inventory);
    info!(instances = plan.len(), "Planned task instances");

    if encoded {
        for units in &plan {
            println!("{}", encode_task_units(units)?);
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    }
    Ok(())
}
