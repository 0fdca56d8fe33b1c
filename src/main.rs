use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use projectstorage::config::{Config, LoggingConfig};

mod cli;

#[derive(Parser)]
#[command(name = "projectstorage")]
#[command(author = "Intent Project Team")]
#[command(version = "0.1.0")]
#[command(about = "Inspect and synchronize a QML project type store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory holding .projectstorage.toml
    #[arg(short, long, global = true, default_value = ".")]
    project: String,

    /// Database file (overrides the configured path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and its schema
    Init,

    /// Synchronize the types of a JSON snapshot into the store
    Sync {
        /// Snapshot file: {"sources": [{"path": ..., "types": [...]}]}
        snapshot: PathBuf,
    },

    /// List all stored types
    Types {
        /// Output format: json, text
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Resolve an exported type name to a type
    Resolve {
        /// Qualified exported name, e.g. QtQuick.Item
        qualified_name: String,

        #[arg(long)]
        major: Option<i64>,

        #[arg(long)]
        minor: Option<i64>,
    },

    /// Print the prototype chain of an exported type
    Prototypes {
        /// Qualified exported name, e.g. QtQuick.Rectangle
        qualified_name: String,

        #[arg(long)]
        major: Option<i64>,

        #[arg(long)]
        minor: Option<i64>,
    },

    /// Show storage statistics
    Stats,
}

fn init_logging(debug: bool, verbose: bool, logging: &LoggingConfig) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format.as_str() {
        "pretty" => builder.pretty().init(),
        "full" => builder.init(),
        _ => builder.compact().init(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_project_dir(&cli.project);
    init_logging(cli.debug, cli.verbose, &config.logging);

    info!("projectstorage v0.1.0 starting...");

    match cli.command {
        Commands::Init => cli::init::init_storage(&config, cli.db)?,

        Commands::Sync { snapshot } => {
            info!("Synchronizing snapshot: {}", snapshot.display());
            cli::sync::sync_snapshot(&config, cli.db, snapshot)?;
        }

        Commands::Types { format } => cli::query::list_types(&config, cli.db, format)?,

        Commands::Resolve {
            qualified_name,
            major,
            minor,
        } => cli::query::resolve(&config, cli.db, qualified_name, major, minor)?,

        Commands::Prototypes {
            qualified_name,
            major,
            minor,
        } => cli::query::prototypes(&config, cli.db, qualified_name, major, minor)?,

        Commands::Stats => cli::stats::show_stats(&config, cli.db, cli.verbose)?,
    }

    Ok(())
}
