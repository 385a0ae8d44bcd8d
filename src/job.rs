//! Fixed-capacity job table.
//!
//! Ids run from 1 to the capacity; registration always takes the lowest
//! free id, so an id is handed out again as soon as its job is removed.

use std::fmt::Write;

use nix::unistd::Pid;
use thiserror::Error;
use tracing::debug;

use crate::parse::{Job, JobMode, Status};

pub const MAX_JOBS: usize = 16;

/// Registration failed; the job is handed back so it can still run.
#[derive(Debug, Error)]
#[error("job table full ({capacity} jobs), `{}` runs untracked", .job.command)]
pub struct TableFull {
    pub capacity: usize,
    pub job: Box<Job>,
}

#[derive(Debug)]
struct Slot {
    /// Registration order, used to find the most recent job.
    seq: u64,
    job: Job,
}

#[derive(Debug)]
pub struct JobTable {
    slots: Vec<Option<Slot>>,
    next_seq: u64,
}

impl Default for JobTable {
    fn default() -> Self {
        JobTable::with_capacity(MAX_JOBS)
    }
}

impl JobTable {
    pub fn with_capacity(capacity: usize) -> JobTable {
        JobTable {
            slots: (0..capacity).map(|_| None).collect(),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn register(&mut self, mut job: Job) -> Result<usize, TableFull> {
        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None => {
                return Err(TableFull {
                    capacity: self.capacity(),
                    job: Box::new(job),
                })
            }
        };
        let id = index + 1;
        job.id = Some(id);
        debug!(id, command = %job.command, "registered job");
        self.slots[index] = Some(Slot {
            seq: self.next_seq,
            job,
        });
        self.next_seq += 1;
        Ok(id)
    }

    fn slot(&self, id: usize) -> Option<&Slot> {
        id.checked_sub(1)
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
    }

    pub fn lookup(&self, id: usize) -> Option<&Job> {
        self.slot(id).map(|slot| &slot.job)
    }

    pub fn lookup_mut(&mut self, id: usize) -> Option<&mut Job> {
        id.checked_sub(1)
            .and_then(|index| self.slots.get_mut(index))
            .and_then(Option::as_mut)
            .map(|slot| &mut slot.job)
    }

    /// Releases the slot. The job and all of its stages are dropped.
    pub fn remove(&mut self, id: usize) -> Option<Job> {
        let slot = id
            .checked_sub(1)
            .and_then(|index| self.slots.get_mut(index))?
            .take()?;
        debug!(id, command = %slot.job.command, "removed job");
        Some(slot.job)
    }

    pub fn find_by_pid(&self, pid: Pid) -> Option<usize> {
        self.iter()
            .find(|(_, job)| job.contains_pid(pid))
            .map(|(id, _)| id)
    }

    pub fn is_complete(&self, id: usize) -> bool {
        self.lookup(id).map_or(false, Job::is_complete)
    }

    /// Records a status change for the stage with `pid` and returns the
    /// owning job's id.
    pub fn set_status(&mut self, pid: Pid, status: Status) -> Option<usize> {
        let id = self.find_by_pid(pid)?;
        let process = self.lookup_mut(id)?.process_mut(pid)?;
        process.status = status;
        Some(id)
    }

    /// Live jobs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Job)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|slot| (index + 1, &slot.job)))
    }

    fn most_recent<F>(&self, pred: F) -> Option<usize>
    where
        F: Fn(&Job) -> bool,
    {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|slot| (index + 1, slot)))
            .filter(|(_, slot)| pred(&slot.job))
            .max_by_key(|(_, slot)| slot.seq)
            .map(|(id, _)| id)
    }

    /// The most recently registered job running or stopped in the background.
    pub fn most_recent_background(&self) -> Option<usize> {
        self.most_recent(|job| job.mode == JobMode::Background)
    }

    /// The most recently registered job with a suspended stage.
    pub fn most_recent_suspended(&self) -> Option<usize> {
        self.most_recent(Job::is_suspended)
    }

    pub fn clear(&mut self) -> Vec<Job> {
        self.slots
            .iter_mut()
            .filter_map(Option::take)
            .map(|slot| slot.job)
            .collect()
    }
}

/// `[id]` followed by one tab-separated `pid status program` entry per stage,
/// stages joined by `|` and a newline.
pub fn status_report(id: usize, job: &Job) -> String {
    let mut out = format!("[{}]", id);
    let last = job.processes.len().saturating_sub(1);
    for (i, p) in job.processes.iter().enumerate() {
        let _ = write!(out, "\t{}\t{}\t{}", p.raw_pid(), p.status, p.program);
        out.push_str(if i < last { "|\n" } else { "\n" });
    }
    if job.processes.is_empty() {
        out.push('\n');
    }
    out
}

/// `[id]` followed by the pid of every stage.
pub fn pid_listing(id: usize, job: &Job) -> String {
    let mut out = format!("[{}]", id);
    for p in job.processes.iter() {
        let _ = write!(out, " {}", p.raw_pid());
    }
    out.push('\n');
    out
}
