//! Child status tracking.
//!
//! Notifications are never handled asynchronously. They are collected with
//! `waitpid` at two kinds of points: a blocking wait on one foreground job,
//! and a non-blocking drain of every pending change before the prompt.

use nix::errno::Errno;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

use crate::job::{status_report, JobTable};
use crate::parse::{Job, Status};

#[derive(Debug, Error)]
#[error("waitpid: {0}")]
pub struct WaitError(#[from] pub Errno);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// No stage is left to wait for.
    Finished,
    /// At least one stage stopped. `reported_all` is set when every stage
    /// that was outstanding reported during this wait.
    Suspended { reported_all: bool },
}

/// Maps a wait result onto the stage status it implies.
pub fn decode(ws: WaitStatus) -> Option<(Pid, Status)> {
    match ws {
        WaitStatus::Exited(pid, _) => Some((pid, Status::Done)),
        WaitStatus::Signaled(pid, _, _) => Some((pid, Status::Terminated)),
        WaitStatus::Stopped(pid, _) => Some((pid, Status::Suspended)),
        WaitStatus::Continued(pid) => Some((pid, Status::Continued)),
        _ => None,
    }
}

/// Blocks until every launched stage of `job` has either finished or
/// stopped. A stage that is continued while the wait is in progress is
/// waited for again.
pub fn wait_job(job: &mut Job) -> Result<WaitOutcome, WaitError> {
    let pgid = match job.pgid {
        Some(pgid) => pgid,
        None => return Ok(WaitOutcome::Finished),
    };
    let group = Pid::from_raw(-pgid.as_raw());
    let flags = WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    // stages that have not reported since the wait began
    let mut silent: Vec<Pid> = job
        .processes
        .iter()
        .filter(|p| !p.status.is_finished())
        .filter_map(|p| p.pid)
        .collect();

    while job.running() > 0 {
        let ws = match wait::waitpid(group, Some(flags)) {
            Ok(ws) => ws,
            Err(Errno::EINTR) => continue,
            // somebody else reaped the rest
            Err(Errno::ECHILD) => break,
            Err(e) => return Err(WaitError(e)),
        };
        let (pid, status) = match decode(ws) {
            Some(change) => change,
            None => continue,
        };
        debug!(pid = pid.as_raw(), %status, "foreground stage changed");
        if let Some(process) = job.process_mut(pid) {
            process.status = status;
            silent.retain(|&p| p != pid);
        }
    }

    if job.is_suspended() {
        Ok(WaitOutcome::Suspended {
            reported_all: silent.is_empty(),
        })
    } else {
        Ok(WaitOutcome::Finished)
    }
}

/// Removes job `id` once it has run to the end and returns its final
/// status line.
pub fn retire(table: &mut JobTable, id: usize) -> Option<String> {
    let job = table.lookup(id)?;
    if !job.is_complete() && !job.is_finished() {
        return None;
    }
    let report = status_report(id, job);
    table.remove(id);
    Some(report)
}

/// Drains every pending child status change without blocking and returns
/// the status lines to print. Produces nothing when no child changed.
pub fn reap(table: &mut JobTable) -> String {
    let mut out = String::new();
    let mut stopped = Vec::new();
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;

    loop {
        let ws = match wait::waitpid(Pid::from_raw(-1), Some(flags)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(ws) => ws,
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(e) => {
                warn!(error = %e, "reaping failed, retrying at the next poll");
                break;
            }
        };
        let (pid, status) = match decode(ws) {
            Some(change) => change,
            None => continue,
        };
        let id = match table.set_status(pid, status) {
            Some(id) => id,
            None => {
                debug!(pid = pid.as_raw(), %status, "untracked child");
                continue;
            }
        };
        debug!(id, pid = pid.as_raw(), %status, "stage changed");

        if let Some(report) = retire(table, id) {
            out.push_str(&report);
        } else if status == Status::Suspended && !stopped.contains(&id) {
            stopped.push(id);
        }
    }

    // a job is reported stopped once all of its live stages have stopped
    for id in stopped {
        if let Some(job) = table.lookup(id) {
            let all_stopped = job
                .processes
                .iter()
                .filter(|p| !p.status.is_finished())
                .all(|p| p.status == Status::Suspended);
            if all_stopped {
                out.push_str(&status_report(id, job));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_line;
    use nix::sys::signal::Signal;
    use pretty_assertions::assert_eq;

    fn launched(line: &str, first_pid: i32) -> Job {
        let mut job = parse_line(line).unwrap().unwrap();
        for (i, p) in job.processes.iter_mut().enumerate() {
            p.pid = Some(Pid::from_raw(first_pid + i as i32));
        }
        job.pgid = Some(Pid::from_raw(first_pid));
        job
    }

    #[test]
    fn decode_transitions() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            decode(WaitStatus::Exited(pid, 0)),
            Some((pid, Status::Done))
        );
        assert_eq!(
            decode(WaitStatus::Exited(pid, 127)),
            Some((pid, Status::Done))
        );
        assert_eq!(
            decode(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some((pid, Status::Terminated))
        );
        assert_eq!(
            decode(WaitStatus::Stopped(pid, Signal::SIGTSTP)),
            Some((pid, Status::Suspended))
        );
        assert_eq!(
            decode(WaitStatus::Continued(pid)),
            Some((pid, Status::Continued))
        );
        assert_eq!(decode(WaitStatus::StillAlive), None);
    }

    #[test]
    fn retire_complete_job() {
        let mut table = JobTable::default();
        let id = table.register(launched("a | b", 100)).unwrap();
        assert_eq!(retire(&mut table, id), None);

        table.set_status(Pid::from_raw(100), Status::Done);
        table.set_status(Pid::from_raw(101), Status::Done);
        assert_eq!(
            retire(&mut table, id).as_deref(),
            Some("[1]\t100\tdone\ta|\n\t101\tdone\tb\n")
        );
        assert!(table.lookup(id).is_none());
    }

    #[test]
    fn retire_signal_killed_job() {
        let mut table = JobTable::default();
        let id = table.register(launched("a | b", 100)).unwrap();
        table.set_status(Pid::from_raw(100), Status::Done);
        table.set_status(Pid::from_raw(101), Status::Terminated);
        assert!(!table.is_complete(id));
        assert_eq!(
            retire(&mut table, id).as_deref(),
            Some("[1]\t100\tdone\ta|\n\t101\tterminated\tb\n")
        );
        assert!(table.is_empty());
    }

    #[test]
    fn retire_keeps_suspended_job() {
        let mut table = JobTable::default();
        let id = table.register(launched("a | b", 100)).unwrap();
        table.set_status(Pid::from_raw(100), Status::Done);
        table.set_status(Pid::from_raw(101), Status::Suspended);
        assert_eq!(retire(&mut table, id), None);
        assert_eq!(table.len(), 1);
    }
}
