//! billsync CLI entry point
//!
//! Parses arguments and dispatches through `cli::run`. Failures are
//! reported as a JSON error document on stdout and a line on stderr, and
//! exit non-zero. All logic lives in the CLI module.

use billsync::cli;

fn main() {
    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
