//! nbredo CLI
//!
//! Command-line tools for B-tree WAL files and the page directories they
//! are replayed into.
//!
//! # Commands
//!
//! - `dump-wal` - Print WAL records for debugging
//! - `replay` - Replay a WAL into a page directory
//! - `mask-compare` - Compare two page directories after masking

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// B-tree WAL inspection and replay tools.
#[derive(Parser)]
#[command(name = "nbredo")]
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
    /// Print WAL records for debugging
    DumpWal {
        /// Path to the WAL file
        wal: PathBuf,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Start from this offset
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay a WAL into a page directory
    Replay {
        /// Path to the WAL file
        wal: PathBuf,

        /// Directory holding the relation files
        #[arg(short, long)]
        pages: PathBuf,

        /// Resolve conflicts with standby queries while replaying
        #[arg(long)]
        hot_standby: bool,
    },

    /// Compare two page directories after masking
    MaskCompare {
        /// First page directory
        a: PathBuf,

        /// Second page directory
        b: PathBuf,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::DumpWal {
            wal,
            limit,
            offset,
            format,
        } => {
            commands::dump_wal::run(&wal, limit, offset, &format)?;
        }
        Commands::Replay {
            wal,
            pages,
            hot_standby,
        } => {
            commands::replay::run(&wal, &pages, hot_standby, cli.verbose)?;
        }
        Commands::MaskCompare { a, b } => {
            commands::mask_compare::run(&a, &b)?;
        }
        Commands::Version => {
            println!("nbredo CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("nbredo core v{}", nbredo_core::VERSION);
        }
    }

    Ok(())
}
