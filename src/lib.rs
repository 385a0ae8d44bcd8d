//! ish: an interactive command interpreter with POSIX job control.
//!
//! A line is parsed into a [`Job`](parse::Job) made of pipeline stages, the
//! stages are forked into one process group, and the job is tracked in a
//! fixed-size [`JobTable`](job::JobTable) until every stage has finished.

pub mod cli;
pub mod common;
pub mod config;
pub mod ish;
pub mod job;
pub mod launch;
pub mod parse;
pub mod sh;
pub mod signal;
pub mod status;
pub mod terminal;

pub use cli::Cli;
pub use common::{CliResult, ShellError};
pub use config::Config;
pub use ish::Ish;
pub use sh::Shell;
