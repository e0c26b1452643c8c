//! Command-line interface

pub mod handlers;
mod output;

pub use output::OutputFormatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Support ticket lifecycle manager
#[derive(Parser, Debug)]
#[command(name = "support-desk", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to support-desk.toml in the data directory)
    #[arg(short, long, global = true, env = "SUPPORT_DESK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the ticket log, snapshot and counter
    #[arg(long, global = true, env = "SUPPORT_DESK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process platform events read as JSON lines from stdin
    Serve,

    /// Show persisted tickets and counters
    Status,

    /// Show recent entries of the durable ticket log
    Log {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}
