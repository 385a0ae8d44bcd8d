use thiserror::Error;

use crate::job::TableFull;
use crate::launch::LaunchError;
use crate::parse::ParseError;
use crate::status::WaitError;

/// Text to print on success, or the single diagnostic line of a failure.
pub type CliResult = Result<String, ShellError>;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("ish: {0}")]
    Parse(#[from] ParseError),
    #[error("ish: {0}")]
    Launch(#[from] LaunchError),
    #[error("ish: {0}")]
    TableFull(#[from] TableFull),
    #[error("ish: {0}")]
    Wait(#[from] WaitError),
    #[error("{0}")]
    Builtin(String),
}

pub fn ok<T: ToString>(s: T) -> CliResult {
    Ok(s.to_string())
}

pub fn err<T: ToString>(s: T) -> CliResult {
    Err(ShellError::Builtin(s.to_string()))
}
