//! Odoomon Control - CLI for the Odoo dev server monitor
//!
//! One-shot commands over the shared monitoring logic: service status,
//! addon directory audits and repairs, service control, resource usage.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "odoomonctl")]
#[command(about = "Odoo dev server monitor - permissions and services", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the odoomon config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show status of all configured services
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Audit all configured addon directories
    Modules {
        #[arg(long)]
        json: bool,
    },

    /// Audit one directory's permissions
    Audit {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Repair ownership and modes of one directory
    Fix {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Start a service by key (e.g. odoo, postgres_14-main)
    Start { service: String },

    /// Stop a service by key
    Stop { service: String },

    /// Restart a service by key
    Restart { service: String },

    /// Show a host resource snapshot
    Resources {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // Library warnings go to stderr so JSON output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = odoomon_common::MonitorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Status { json } => commands::status(&config, json),
        Commands::Modules { json } => commands::modules(&config, json),
        Commands::Audit { path, json } => commands::audit(&config, &path, json),
        Commands::Fix { path, json } => commands::fix(&config, &path, json),
        Commands::Start { service } => commands::control(&config, &service, "start"),
        Commands::Stop { service } => commands::control(&config, &service, "stop"),
        Commands::Restart { service } => commands::control(&config, &service, "restart"),
        Commands::Resources { json } => commands::resources(json),
    }
}
