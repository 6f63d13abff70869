//! ReplicaDB CLI
//!
//! Command-line tools for replaying oplog batches.
//!
//! # Commands
//!
//! - `replay` - Apply a file of analyzed batches to an in-memory store
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ReplicaDB command-line tools.
#[derive(Parser)]
#[command(name = "replidb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a file of analyzed batches, one JSON batch per line
    Replay {
        /// Batch file to replay
        #[arg(short, long)]
        input: PathBuf,

        /// Attempts allowed when re-applying after a write conflict
        #[arg(short, long, default_value = "5")]
        max_attempts: u32,

        /// What to do with a batch that cannot be applied
        #[arg(long, value_enum, default_value = "halt")]
        on_failure: OnFailure,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Print the documents of every collection
        #[arg(short, long)]
        dump: bool,
    },

    /// Show version information
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnFailure {
    /// Stop at the first failed batch
    Halt,
    /// Log the failure and continue with the next batch
    Skip,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay {
            input,
            max_attempts,
            on_failure,
            format,
            dump,
        } => {
            let policy = match on_failure {
                OnFailure::Halt => replidb_repl::FailurePolicy::Halt,
                OnFailure::Skip => replidb_repl::FailurePolicy::SkipAndLog,
            };
            commands::replay::run(&input, max_attempts, policy, &format, dump)?;
        }
        Commands::Version => {
            println!("ReplicaDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("ReplicaDB Repl v{}", replidb_repl::VERSION);
        }
    }

    Ok(())
}
