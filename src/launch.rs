use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::{self, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, warn};

use crate::parse::{Job, JobMode, OutputMode, Process, Status};
use crate::signal::restore_child_defaults;
use crate::terminal::{self, Terminal};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{path}: {}", describe_open(.source))]
    Input {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("pipe: {0}")]
    Pipe(#[source] Errno),
    #[error("fork failed at stage {stage}: {source}")]
    Fork {
        stage: usize,
        #[source]
        source: Errno,
    },
    #[error("{0}: argument contains a NUL byte")]
    Nul(String),
}

fn describe_open(e: &io::Error) -> String {
    match e.kind() {
        io::ErrorKind::NotFound => "no such file or directory".to_owned(),
        _ => e.to_string(),
    }
}

/// Everything a child needs, built before forking so the child does not
/// allocate.
struct Prepared {
    argv: Vec<CString>,
}

fn prepare(process: &Process) -> Result<Prepared, LaunchError> {
    let argv = process
        .args
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| LaunchError::Nul(process.program.clone()))?;
    Ok(Prepared { argv })
}

fn open_input(path: &str) -> Result<OwnedFd, LaunchError> {
    File::open(path)
        .map(OwnedFd::from)
        .map_err(|source| LaunchError::Input {
            path: path.to_owned(),
            source,
        })
}

/// Opens the output redirection of the last stage. Failure is not fatal:
/// the stage writes to the shell's own standard output instead.
fn open_output(process: &Process) -> Option<OwnedFd> {
    let path = process.output.as_deref()?;
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(0o644);
    match process.output_mode {
        OutputMode::Truncate => options.truncate(true),
        OutputMode::Append => options.append(true),
    };
    match options.open(path) {
        Ok(file) => Some(OwnedFd::from(file)),
        Err(e) => {
            warn!(path, error = %e, "output redirection failed");
            eprintln!("ish: {}: {}, writing to standard output", path, e);
            None
        }
    }
}

/// Stages from `from` on were never started; they will not report.
fn abandon(job: &mut Job, from: usize) {
    for p in job.processes[from..].iter_mut() {
        p.status = Status::Terminated;
    }
}

/// Forks one child per stage, left to right, connecting neighbours with
/// pipes. The first child founds the job's process group and every later
/// child joins it. Input redirection applies to the first stage and output
/// redirection to the last one.
///
/// On a pipe or fork failure the stages already started keep running and
/// `job.pgid` is set; the caller decides whether to keep tracking them.
pub fn spawn_job(job: &mut Job, terminal: &Terminal) -> Result<(), LaunchError> {
    if job.processes.is_empty() {
        return Ok(());
    }
    let prepared = job
        .processes
        .iter()
        .map(prepare)
        .collect::<Result<Vec<_>, _>>()?;
    let last = job.processes.len() - 1;

    for (index, p) in job.processes.iter().enumerate() {
        if index != 0 && p.input.is_some() {
            warn!(stage = index, program = %p.program, "input redirection ignored inside a pipeline");
        }
        if index != last && p.output.is_some() {
            warn!(stage = index, program = %p.program, "output redirection ignored inside a pipeline");
        }
    }

    let mut input = match job.processes[0].input.as_deref() {
        Some(path) => Some(open_input(path)?),
        None => None,
    };
    let take_terminal = job.mode == JobMode::Foreground && terminal.is_enabled();

    for index in 0..=last {
        let (output, next_input) = if index < last {
            match unistd::pipe2(OFlag::O_CLOEXEC) {
                Ok((read, write)) => (Some(write), Some(read)),
                Err(e) => {
                    abandon(job, index);
                    return Err(LaunchError::Pipe(e));
                }
            }
        } else {
            (open_output(&job.processes[index]), None)
        };

        match unsafe { unistd::fork() } {
            Ok(ForkResult::Child) => exec_stage(
                &prepared[index],
                job.pgid,
                input.as_ref(),
                output.as_ref(),
                take_terminal,
            ),
            Ok(ForkResult::Parent { child }) => {
                let pgid = *job.pgid.get_or_insert(child);
                // the child does the same; whichever runs first wins
                if let Err(e) = unistd::setpgid(child, pgid) {
                    debug!(pid = child.as_raw(), error = %e, "setpgid from parent");
                }
                let mode = job.stage_mode(index);
                let process = &mut job.processes[index];
                process.pid = Some(child);
                process.status = Status::Running;
                debug!(
                    pid = child.as_raw(),
                    pgid = pgid.as_raw(),
                    program = %process.program,
                    ?mode,
                    "started stage"
                );
            }
            Err(e) => {
                abandon(job, index);
                return Err(LaunchError::Fork {
                    stage: index,
                    source: e,
                });
            }
        }
        // the parent's copies of this stage's descriptors close here
        input = next_input;
    }
    Ok(())
}

/// Child side of a fork: join the group, take the terminal if the job runs
/// in the foreground, wire standard input/output and exec. Never returns.
fn exec_stage(
    stage: &Prepared,
    pgid: Option<Pid>,
    input: Option<&OwnedFd>,
    output: Option<&OwnedFd>,
    take_terminal: bool,
) -> ! {
    let pid = unistd::getpid();
    let pgid = pgid.unwrap_or(pid);
    let _ = unistd::setpgid(pid, pgid);
    if take_terminal {
        let _ = terminal::hand_over(pgid);
    }
    restore_child_defaults();

    if let Some(fd) = input {
        let _ = unistd::dup2(fd.as_raw_fd(), libc::STDIN_FILENO);
    }
    if let Some(fd) = output {
        let _ = unistd::dup2(fd.as_raw_fd(), libc::STDOUT_FILENO);
    }

    let program = &stage.argv[0];
    let err = match unistd::execvp(program, &stage.argv) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    let stderr = io::stderr();
    let _ = unistd::write(&stderr, program.as_bytes());
    if err == Errno::ENOENT {
        let _ = unistd::write(&stderr, b": command not found\n");
        unsafe { libc::_exit(127) }
    }
    let _ = unistd::write(&stderr, b": ");
    let _ = unistd::write(&stderr, err.desc().as_bytes());
    let _ = unistd::write(&stderr, b"\n");
    unsafe { libc::_exit(126) }
}
