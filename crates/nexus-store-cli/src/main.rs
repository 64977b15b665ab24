use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{OutputContext, check, create, info, migrate};

/// Operator tool for Nexus store directories
#[derive(Parser)]
#[command(name = "nexus-store")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML settings file
    #[arg(long, env = "NEXUS_STORE_CONFIG")]
    pub config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an empty store directory
    Create(create::CreateArgs),
    /// Show version and record counts of a store
    Info(info::InfoArgs),
    /// Run the consistency checker
    Check(check::CheckArgs),
    /// Migrate a legacy store to the current format
    Migrate(migrate::MigrateArgs),
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "nexus_store=debug,nexus_store_cli=debug".into())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "nexus_store=warn,nexus_store_cli=info".into())
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let settings = config::load_settings(cli.config.as_deref())?;
    let output = OutputContext {
        json: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Create(args) => create::execute(args, settings, &output),
        Commands::Info(args) => info::execute(args, settings, &output),
        Commands::Check(args) => check::execute(args, settings, &output),
        Commands::Migrate(args) => migrate::execute(args, settings, &output),
    }
}
