//! syncctl - content sync operator tool
//!
//! Runs push/pull/reset between the staging and production content
//! databases, inspects table drift, and serves the HTTP trigger.

mod output;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use common::logging::{self, LogConfig};
use content_sync::{SyncConfig, SyncDirection, SyncEngine, SyncMode};
use tracing::{debug, Level};

/// Log lines printed after a run
const LOG_TAIL_LINES: usize = 20;

#[derive(Parser)]
#[command(name = "syncctl")]
#[command(about = "Content sync between staging and production")]
#[command(long_about = "Content sync between staging and production

Runs:
  push        Sync staging -> production (incremental)
  pull        Sync production -> staging (incremental)
  reset       Replace the destination with an exact copy of the source

Operations:
  inspect     Show a table's columns and keys in both databases
  serve       Expose runs over HTTP

Examples:
  syncctl push                          # Incremental staging -> production
  syncctl reset --direction pull --yes  # Rebuild staging from production
  syncctl inspect news_articles         # Compare schemas side by side
  syncctl serve --bind 0.0.0.0:8085     # Start the HTTP trigger

Configuration comes from --config (yaml/toml/json) and CONTENT_SYNC_* variables.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (yaml, toml or json)
    #[arg(short, long, global = true, env = "CONTENT_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Directory for daily rolling log files
    #[arg(long, global = true)]
    log_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync staging into production
    Push,

    /// Sync production into staging
    Pull,

    /// Truncate and reload every listed table in the destination
    Reset {
        /// push (staging -> production) or pull (production -> staging)
        #[arg(short, long, default_value = "push")]
        direction: SyncDirection,

        /// Confirm the destination may be wiped
        #[arg(long)]
        yes: bool,
    },

    /// Show a table's definition in both databases
    Inspect {
        /// Table name
        table: String,
    },

    /// Serve the HTTP trigger
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:8085")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = match SyncConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "ERROR".red(), e);
            std::process::exit(1);
        },
    };

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        config.logging.level.parse().unwrap_or(Level::INFO)
    };
    let log_dir = logging::init_log_root(cli.log_dir.as_deref().or(config.logging.dir.as_deref()));
    if let Err(e) = logging::init_with_config(LogConfig {
        service_name: "syncctl".to_string(),
        log_dir,
        level,
        enable_json: config.logging.json,
        ansi: !cli.no_color,
    }) {
        eprintln!("{} Logging setup failed: {}", "WARN".yellow(), e);
    }
    debug!("Loaded config, {} tables listed", config.tables.len());

    let engine = match SyncEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{} {}", "ERROR".red(), e);
            std::process::exit(1);
        },
    };
    if !engine.reconciliation_enabled() {
        println!("{} Asset reconciliation disabled", "INFO".bright_cyan());
    }

    match cli.command {
        Commands::Push => run_command(&engine, SyncDirection::Push, SyncMode::Incremental).await,
        Commands::Pull => run_command(&engine, SyncDirection::Pull, SyncMode::Incremental).await,
        Commands::Reset { direction, yes } => {
            if !yes {
                eprintln!(
                    "{} reset replaces every listed table in {} with the contents of {}",
                    "WARNING".yellow(),
                    direction.destination_label().bright_yellow(),
                    direction.source_label()
                );
                eprintln!("  Re-run with --yes to proceed");
                std::process::exit(1);
            }
            run_command(&engine, direction, SyncMode::Reset).await
        },
        Commands::Inspect { table } => match engine.inspect(&table).await {
            Ok(inspection) => {
                output::print_inspection(&inspection);
                Ok(())
            },
            Err(e) => {
                eprintln!("{} {}", "ERROR".red(), e);
                std::process::exit(1);
            },
        },
        Commands::Serve { bind } => server::serve(engine, bind).await,
    }
}

async fn run_command(engine: &SyncEngine, direction: SyncDirection, mode: SyncMode) -> Result<()> {
    println!(
        "{} {} -> {} ({})",
        "Starting:".bright_cyan(),
        direction.source_label().bright_yellow(),
        direction.destination_label().bright_yellow(),
        mode
    );

    let report = engine.run(direction, mode).await;
    output::print_report(&report, LOG_TAIL_LINES);

    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}
