use crate::common::CliResult;

/// What the front end can ask of a shell.
pub trait Shell {
    /// The prompt to print, empty when prompting is off.
    fn prompt(&self) -> CliResult;

    /// Parses and runs one command line.
    fn run(&mut self, line: &str) -> CliResult;

    /// Collects pending child status changes without blocking.
    fn poll(&mut self) -> CliResult;

    /// Status lines of every live job.
    fn list_jobs(&self) -> CliResult;

    fn cd(&mut self, args: &[String]) -> CliResult;
    fn fg(&mut self) -> CliResult;
    fn bg(&mut self) -> CliResult;
    fn exit(&mut self) -> CliResult;

    fn exit_requested(&self) -> bool;

    /// Hangs up every remaining job.
    fn shutdown(&mut self);
}
