use std::io::{self, IsTerminal};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ish::{Cli, Config};

fn main() {
    let mut config = Config::parse();
    config.job_control = config.command.is_none() && io::stdin().is_terminal();

    let filter = EnvFilter::try_from_env("ISH_LOG")
        .unwrap_or_else(|_| EnvFilter::new(config.log_level()));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();

    let command = config.command.clone();
    let mut client = Cli::new(config);
    match command {
        Some(line) => client.run_once(&line),
        None => client.go(),
    }
}
