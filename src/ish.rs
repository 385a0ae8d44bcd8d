use std::env;
use std::path::{Path, PathBuf};

use nix::sys::signal::{self, Signal};
use nix::unistd::{self, User};
use tracing::{debug, info, warn};

use crate::common::*;
use crate::config::Config;
use crate::job::{pid_listing, status_report, JobTable};
use crate::launch;
use crate::parse::{parse_line, Job, JobMode, ProcessKind};
use crate::sh::Shell;
use crate::status::{self, WaitOutcome};
use crate::terminal::Terminal;

/// The shell context: everything the interpreter mutates lives here.
#[derive(Debug)]
pub struct Ish {
    config: Config,
    home: PathBuf,
    cwd: PathBuf,
    terminal: Terminal,
    jobs: JobTable,
    exit_requested: bool,
}

fn login_user() -> String {
    if let Ok(user) = env::var("USER") {
        return user;
    }
    match User::from_uid(unistd::getuid()) {
        Ok(Some(user)) => user.name,
        _ => String::new(),
    }
}

impl Ish {
    pub fn new(config: Config) -> Ish {
        let terminal = if config.job_control {
            Terminal::attach().unwrap_or_else(|e| {
                warn!(error = %e, "job control unavailable");
                Terminal::detached()
            })
        } else {
            Terminal::detached()
        };
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        let cwd = env::current_dir().unwrap_or_else(|_| home.clone());
        info!(
            user = %login_user(),
            home = %home.display(),
            job_control = terminal.is_enabled(),
            "shell started"
        );

        Ish {
            jobs: JobTable::with_capacity(config.capacity()),
            config,
            home,
            cwd,
            terminal,
            exit_requested: false,
        }
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn launch(&mut self, job: Job) -> CliResult {
        if job.is_builtin() {
            return self.run_builtin(job);
        }
        match self.jobs.register(job) {
            Ok(id) => self.launch_tracked(id),
            Err(full) => {
                warn!(capacity = full.capacity, "job table full");
                let mut out = format!("ish: {}\n", full);
                out.push_str(&self.launch_untracked(*full.job)?);
                Ok(out)
            }
        }
    }

    fn launch_tracked(&mut self, id: usize) -> CliResult {
        let job = match self.jobs.lookup_mut(id) {
            Some(job) => job,
            None => return ok(""),
        };
        let mut out = String::new();
        if let Err(e) = launch::spawn_job(job, &self.terminal) {
            if job.pgid.is_none() {
                self.jobs.remove(id);
                return Err(e.into());
            }
            // keep tracking the stages that did start
            out.push_str(&format!("{}\n", ShellError::from(e)));
        }
        if job.mode == JobMode::Background {
            out.push_str(&pid_listing(id, job));
            return Ok(out);
        }
        out.push_str(&self.wait_foreground(id)?);
        Ok(out)
    }

    /// Runs a job the table cannot hold. It is waited for if it runs in the
    /// foreground and otherwise left to itself.
    fn launch_untracked(&mut self, mut job: Job) -> CliResult {
        let mut out = String::new();
        if let Err(e) = launch::spawn_job(&mut job, &self.terminal) {
            if job.pgid.is_none() {
                return Err(e.into());
            }
            out.push_str(&format!("{}\n", ShellError::from(e)));
        }
        if job.mode == JobMode::Background {
            return Ok(out);
        }
        if let WaitOutcome::Suspended { .. } = self.terminal.run_foreground(&mut job)? {
            warn!(command = %job.command, "untracked job stopped");
            out.push_str(&format!("ish: untracked job `{}` stopped\n", job.command));
        }
        Ok(out)
    }

    /// Gives job `id` the terminal and blocks until it finishes or stops.
    /// A finished job is removed; a stopped one stays as a background job.
    fn wait_foreground(&mut self, id: usize) -> CliResult {
        let job = match self.jobs.lookup_mut(id) {
            Some(job) => job,
            None => return ok(""),
        };
        job.mode = JobMode::Foreground;
        match self.terminal.run_foreground(job) {
            Ok(WaitOutcome::Finished) => {
                self.jobs.remove(id);
                ok("")
            }
            Ok(WaitOutcome::Suspended { reported_all }) => {
                job.mode = JobMode::Background;
                if reported_all {
                    Ok(status_report(id, job))
                } else {
                    ok("")
                }
            }
            Err(e) => {
                // the idle poll picks up whatever the job does next
                warn!(id, error = %e, "foreground wait failed");
                job.mode = JobMode::Background;
                Err(e.into())
            }
        }
    }

    /// Runs the leading built-in in-process. Any stages piped after it run
    /// as an untracked pipeline.
    fn run_builtin(&mut self, mut job: Job) -> CliResult {
        let builtin = job.processes.remove(0);
        debug!(program = %builtin.program, "builtin");
        let mut out = match builtin.kind {
            ProcessKind::Exit => self.exit(),
            ProcessKind::Cd => self.cd(&builtin.args[1..]),
            ProcessKind::Fg => self.fg(),
            ProcessKind::Bg => self.bg(),
            ProcessKind::External => ok(""),
        }?;
        if !job.processes.is_empty() && !self.exit_requested {
            out.push_str(&self.launch_untracked(job)?);
        }
        Ok(out)
    }
}

impl Shell for Ish {
    fn prompt(&self) -> CliResult {
        if self.config.emit_prompt {
            ok(&self.config.prompt)
        } else {
            ok("")
        }
    }

    fn run(&mut self, line: &str) -> CliResult {
        match parse_line(line)? {
            Some(job) => self.launch(job),
            None => ok(""),
        }
    }

    fn poll(&mut self) -> CliResult {
        Ok(status::reap(&mut self.jobs))
    }

    fn list_jobs(&self) -> CliResult {
        let mut out = String::new();
        for (id, job) in self.jobs.iter() {
            out.push_str(&status_report(id, job));
        }
        Ok(out)
    }

    fn cd(&mut self, args: &[String]) -> CliResult {
        let target = match args.first() {
            Some(target) => target.trim().to_owned(),
            None => {
                if let Err(e) = env::set_current_dir(&self.home) {
                    return err(format!("cd: {}: {}", self.home.display(), e));
                }
                self.cwd = self.home.clone();
                return ok("");
            }
        };
        let mut path = if target.starts_with('/') {
            PathBuf::from("/")
        } else {
            self.cwd.clone()
        };
        for part in target.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    path.pop();
                }
                part => path.push(part),
            }
        }
        if let Err(e) = env::set_current_dir(&path) {
            return err(format!("cd: {}: {}", target, e));
        }
        self.cwd = env::current_dir().unwrap_or(path);
        ok("")
    }

    fn fg(&mut self) -> CliResult {
        let id = match self.jobs.most_recent_background() {
            Some(id) => id,
            None => return err("fg: no background job"),
        };
        let job = match self.jobs.lookup_mut(id) {
            Some(job) => job,
            None => return err("fg: no background job"),
        };
        let pgid = match job.pgid {
            Some(pgid) => pgid,
            None => return err(format!("fg: job {} not found", id)),
        };
        if let Err(e) = signal::killpg(pgid, Signal::SIGCONT) {
            return err(format!("fg: job {} not found: {}", id, e));
        }
        job.mark_continued();
        let mut out = format!("{}\n", job.command);
        out.push_str(&self.wait_foreground(id)?);
        Ok(out)
    }

    fn bg(&mut self) -> CliResult {
        let id = match self.jobs.most_recent_suspended() {
            Some(id) => id,
            None => return err("bg: no suspended job"),
        };
        let job = match self.jobs.lookup_mut(id) {
            Some(job) => job,
            None => return err("bg: no suspended job"),
        };
        let pgid = match job.pgid {
            Some(pgid) => pgid,
            None => return err(format!("bg: job {} not found", id)),
        };
        if let Err(e) = signal::killpg(pgid, Signal::SIGCONT) {
            return err(format!("bg: job {} not found: {}", id, e));
        }
        job.mark_continued();
        job.mode = JobMode::Background;
        Ok(pid_listing(id, job))
    }

    fn exit(&mut self) -> CliResult {
        self.exit_requested = true;
        ok("")
    }

    fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    fn shutdown(&mut self) {
        for job in self.jobs.clear() {
            if let Some(pgid) = job.pgid {
                debug!(pgid = pgid.as_raw(), command = %job.command, "hanging up");
                let _ = signal::killpg(pgid, Signal::SIGHUP);
                let _ = signal::killpg(pgid, Signal::SIGCONT);
            }
        }
        if self.terminal.is_enabled() {
            self.terminal.reclaim();
        }
    }
}
