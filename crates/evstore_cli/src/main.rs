//! evstore CLI
//!
//! Command-line tools for evstore data directories.
//!
//! # Commands
//!
//! - `inspect` - Display space counts and layout metadata
//! - `verify` - Cross-check records against their index entries
//! - `migrate` - Show or apply layout migrations
//! - `import` - Load newline-delimited JSON events

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// evstore command-line tools.
#[derive(Parser)]
#[command(name = "evstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Seconds to wait for another process to release the directory lock
    #[arg(global = true, long, default_value = "20")]
    lock_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display space counts and layout metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify records and index entries agree
    Verify,

    /// Manage layout migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Import newline-delimited JSON events
    Import {
        /// Input file, or `-` for standard input
        file: PathBuf,

        /// Stop at the first line that cannot be stored
        #[arg(long)]
        stop_on_error: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Show the stored and latest layout versions
    Status,

    /// List registered migrations
    List,

    /// Apply pending migrations
    Run {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let timeout = Duration::from_secs(cli.lock_timeout);

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Data directory required for inspect")?;
            commands::inspect::run(&path, timeout, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Data directory required for verify")?;
            commands::verify::run(&path, timeout)?;
        }
        Commands::Migrate { action } => {
            let path = cli.path.ok_or("Data directory required for migrate")?;
            match action {
                MigrateAction::Status => commands::migrate::status(&path, timeout)?,
                MigrateAction::List => commands::migrate::list(&path, timeout)?,
                MigrateAction::Run { dry_run } => {
                    commands::migrate::run(&path, timeout, dry_run)?;
                }
            }
        }
        Commands::Import {
            file,
            stop_on_error,
        } => {
            let path = cli.path.ok_or("Data directory required for import")?;
            commands::import::run(&path, timeout, &file, stop_on_error)?;
        }
        Commands::Version => {
            println!("evstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("evstore core v{}", evstore_core::VERSION);
        }
    }

    Ok(())
}
