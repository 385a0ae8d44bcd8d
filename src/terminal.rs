//! Ownership of the controlling terminal.
//!
//! With job control enabled the shell lives in its own process group, hands
//! the terminal to a job's group before waiting for it, and takes the
//! terminal back once the job finishes or stops. Without job control (input
//! is not a terminal) every handoff is a no-op.

use std::io;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};
use tracing::{debug, warn};

use crate::parse::Job;
use crate::signal::{ignore_job_control_signals, TtouGuard};
use crate::status::{self, WaitError, WaitOutcome};

/// Makes `pgid` the terminal's foreground group with SIGTTOU suppressed.
/// Safe to call in a forked child.
pub fn hand_over(pgid: Pid) -> nix::Result<()> {
    let _guard = TtouGuard::new();
    unistd::tcsetpgrp(io::stdin(), pgid)
}

#[derive(Debug, Clone, Copy)]
pub struct Terminal {
    shell_pgid: Pid,
    enabled: bool,
}

impl Terminal {
    pub fn detached() -> Terminal {
        Terminal {
            shell_pgid: unistd::getpgrp(),
            enabled: false,
        }
    }

    /// Takes control of the terminal for an interactive shell: waits until
    /// the shell is in the foreground, ignores the job-control signals, moves
    /// the shell into its own process group and claims the terminal.
    pub fn attach() -> nix::Result<Terminal> {
        loop {
            let pgrp = unistd::getpgrp();
            if unistd::tcgetpgrp(io::stdin())? == pgrp {
                break;
            }
            signal::killpg(pgrp, Signal::SIGTTIN)?;
        }

        ignore_job_control_signals()?;

        let pid = unistd::getpid();
        match unistd::setpgid(pid, pid) {
            Ok(()) => {}
            // already a session leader
            Err(Errno::EPERM) => debug!("shell keeps its process group"),
            Err(e) => return Err(e),
        }
        let shell_pgid = unistd::getpgrp();
        hand_over(shell_pgid)?;
        debug!(pgid = shell_pgid.as_raw(), "terminal attached");

        Ok(Terminal {
            shell_pgid,
            enabled: true,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    pub fn give_to(&self, pgid: Pid) {
        if !self.enabled {
            return;
        }
        match hand_over(pgid) {
            Ok(()) => debug!(pgid = pgid.as_raw(), "terminal handed over"),
            Err(e) => warn!(pgid = pgid.as_raw(), error = %e, "tcsetpgrp failed"),
        }
    }

    pub fn reclaim(&self) {
        self.give_to(self.shell_pgid);
    }

    /// Runs `job` in the foreground: hands it the terminal, blocks until it
    /// finishes or stops, and takes the terminal back either way.
    pub fn run_foreground(&self, job: &mut Job) -> Result<WaitOutcome, WaitError> {
        let pgid = match job.pgid {
            Some(pgid) => pgid,
            None => return Ok(WaitOutcome::Finished),
        };
        self.give_to(pgid);
        let outcome = status::wait_job(job);
        self.reclaim();
        outcome
    }
}
