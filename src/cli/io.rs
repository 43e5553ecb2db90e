//! JSON output for CLI commands
//!
//! - Output: one JSON document on stdout
//! - Logs go to stderr, never stdout

use std::io::{self, Write};

use serde::Serialize;

use super::errors::CliResult;

/// Write a success response to stdout
pub fn write_response<T: Serialize>(data: &T) -> CliResult<()> {
    let data = serde_json::to_value(data)?;
    let response = serde_json::json!({
        "status": "ok",
        "data": data,
    });

    let mut stdout = io::stdout();
    serde_json::to_writer_pretty(&mut stdout, &response)?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(())
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    });

    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, &response)?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(())
}
