use clap::{ArgAction, Parser};

use crate::job::MAX_JOBS;

#[derive(Debug, Clone, Parser)]
#[command(name = "ish", version, about = "A small interactive shell with job control")]
pub struct Config {
    /// Do not print a prompt
    #[arg(short = 'p', long = "no-prompt", action = ArgAction::SetFalse)]
    pub emit_prompt: bool,

    /// Prompt string
    #[arg(long, default_value = "ish$ ")]
    pub prompt: String,

    /// Log debug information to standard error
    #[arg(short, long)]
    pub verbose: bool,

    /// Number of jobs that can be tracked at once
    #[arg(long, default_value_t = MAX_JOBS)]
    pub max_jobs: usize,

    /// Run one command line and exit
    #[arg(short = 'c', value_name = "LINE")]
    pub command: Option<String>,

    /// Process groups get the terminal; set when input is a terminal
    #[arg(skip)]
    pub job_control: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            emit_prompt: true,
            prompt: "ish$ ".to_owned(),
            verbose: false,
            max_jobs: MAX_JOBS,
            command: None,
            job_control: false,
        }
    }
}

impl Config {
    /// Log filter used when `ISH_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "warn"
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_jobs.max(1)
    }
}
