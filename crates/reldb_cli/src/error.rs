//! CLI error types.

use thiserror::Error;

/// Errors in command-line input.
#[derive(Debug, Error)]
pub enum CliError {
    /// A `--param` was not of the form `name=value`.
    #[error("invalid parameter {0:?}: expected name=value")]
    InvalidParam(String),

    /// A parameter name was given twice.
    #[error("parameter {0:?} given more than once")]
    DuplicateParam(String),

    /// Unknown `--format`.
    #[error("unknown output format {0:?}: expected text or json")]
    UnknownFormat(String),
}
