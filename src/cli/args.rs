//! CLI argument definitions using clap
//!
//! Commands:
//! - billsync config [--config <path>]
//! - billsync simulate [--config <path>] [--json-logs]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// billsync - optimistic replication of shared bills
#[derive(Parser, Debug)]
#[command(name = "billsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the validated effective configuration
    Config {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run a two-client session against an in-memory store and print a report
    Simulate {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Emit logs as JSON lines on stderr
        #[arg(long)]
        json_logs: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
