//! CLI module for billsync
//!
//! Provides command-line interface for:
//! - config: Print the effective configuration
//! - simulate: Replay a scripted two-client session against an in-memory
//!   store and print the resulting views, conflicts and metrics

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{run, run_command, run_simulation, show_config, simulate, OperationOutcome, SimulationReport};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
