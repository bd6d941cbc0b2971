//! Entigraph CLI
//!
//! Command-line tools for inspecting wire values and cached blobs.
//!
//! # Commands
//!
//! - `decode` - Decode wire JSON and describe the value
//! - `inspect` - List the blobs in a cache directory
//! - `show` - Print one cached blob
//! - `remove` - Delete one cached blob

mod commands;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Entigraph command-line tools.
#[derive(Parser)]
#[command(name = "entigraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the cache directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode wire JSON from a file or stdin
    Decode {
        /// Input file (stdin if omitted)
        input: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List cached blobs
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print a cached blob
    Show {
        /// Blob key
        key: String,
    },

    /// Delete a cached blob
    Remove {
        /// Blob key
        key: String,
    },

    /// Show version information
    Version,
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
        Commands::Decode { input, format } => {
            let format: OutputFormat = format.parse()?;
            commands::decode::run(input.as_deref(), format)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Cache path required for inspect")?;
            let format: OutputFormat = format.parse()?;
            commands::inspect::run(&path, format)?;
        }
        Commands::Show { key } => {
            let path = cli.path.ok_or("Cache path required for show")?;
            commands::show::run(&path, &key)?;
        }
        Commands::Remove { key } => {
            let path = cli.path.ok_or("Cache path required for remove")?;
            commands::show::remove(&path, &key)?;
        }
        Commands::Version => {
            println!("Entigraph CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Entigraph Core v{}", entigraph_core::VERSION);
            println!("Blob format v{}", entigraph_core::FORMAT_VERSION);
        }
    }

    Ok(())
}
