//! Error type shared by all CLI commands.

use std::error::Error;
use std::fmt;

/// Errors reported to the terminal by CLI commands.
///
/// Library errors are flattened to strings at the command boundary so
/// every failure prints as a single `Error: ...` line with the detail
/// the user needs and nothing else.
#[derive(Debug)]
pub enum CliError {
    /// Configuration file could not be read or contained bad values.
    Config(String),
    /// A command-line argument failed validation.
    InvalidArgument(String),
    /// Starting or running a download job failed.
    Download(String),
    /// A tile store operation failed.
    Store(String),
    /// No offline map matches the given store id.
    NotFound(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "configuration error: {}", msg),
            CliError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            CliError::Download(msg) => write!(f, "download failed: {}", msg),
            CliError::Store(msg) => write!(f, "store operation failed: {}", msg),
            CliError::NotFound(id) => write!(f, "no offline map with id '{}'", id),
        }
    }
}

impl Error for CliError {}
