//! tilestash - download map regions for offline use.
//!
//! Subcommands:
//! - `download`: fetch a rectangular region into a new offline store
//! - `list`: show completed offline maps under the data directory
//! - `remove`: delete an offline map and all its files

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use crate::error::CliError;

/// Download rectangular map regions into durable offline tile stores.
#[derive(Parser)]
#[command(name = "tilestash", version, about)]
struct Cli {
    /// Path to an INI configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory holding offline stores (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a map region into a new offline store
    Download(commands::download::DownloadArgs),
    /// List completed offline maps
    List,
    /// Remove an offline map and delete its files
    Remove(commands::remove::RemoveArgs),
}

fn main() {
    let cli = Cli::parse();

    // The appender guard must stay alive until the process exits or
    // buffered log lines are lost.
    let _log_guard = match &cli.log_file {
        Some(path) => match tilestash::logging::init_with_file(path) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Error: cannot open log file {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => {
            tilestash::logging::init();
            None
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = commands::common::resolve_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Command::Download(args) => commands::download::run(args, config).await,
        Command::List => commands::list::run(config).await,
        Command::Remove(args) => commands::remove::run(args, config).await,
    }
}
