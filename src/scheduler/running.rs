//! Running-job table.
//!
//! Pairs each live child with the record it was launched from. Entries are
//! polled without blocking once per tick and removed when the child exits.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use log::{debug, error};
use tokio::process::Child;

use crate::domain::{JobId, JobRecord};

/// A launched job and its process handle.
#[derive(Debug)]
pub struct RunningJob {
    pub child: Child,
    pub job: JobRecord,
}

impl RunningJob {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// How a reaped job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Succeeded,
    /// Nonzero exit; the code is `128 + signal` when the child was killed
    /// by a signal, and `None` if the exit could not be observed at all
    Failed(Option<i32>),
}

impl ExitOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => ExitOutcome::Succeeded,
            Some(code) => ExitOutcome::Failed(Some(code)),
            None => ExitOutcome::Failed(status.signal().map(|sig| 128 + sig)),
        }
    }

    pub fn retcode(&self) -> Option<i32> {
        match self {
            ExitOutcome::Succeeded => Some(0),
            ExitOutcome::Failed(code) => *code,
        }
    }
}

/// A job whose process has exited and been removed from the table.
#[derive(Debug)]
pub struct FinishedJob {
    pub job: JobRecord,
    pub outcome: ExitOutcome,
}

/// The set of currently live jobs.
#[derive(Debug, Default)]
pub struct RunningTable {
    entries: Vec<RunningJob>,
}

impl RunningTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, child: Child, job: JobRecord) {
        self.entries.push(RunningJob { child, job });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, jobid: JobId) -> bool {
        self.entries.iter().any(|e| e.job.jobid == jobid)
    }

    pub fn jobids(&self) -> Vec<JobId> {
        self.entries.iter().map(|e| e.job.jobid).collect()
    }

    /// Poll every entry without blocking and remove the ones that exited.
    pub fn reap(&mut self) -> Vec<FinishedJob> {
        let mut finished = Vec::new();
        let mut still_running = Vec::with_capacity(self.entries.len());

        for mut entry in self.entries.drain(..) {
            match entry.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Job {} (pid {:?}) exited: {}", entry.job.jobid, entry.pid(), status);
                    finished.push(FinishedJob {
                        job: entry.job,
                        outcome: ExitOutcome::from_status(status),
                    });
                }
                Ok(None) => still_running.push(entry),
                Err(e) => {
                    error!("Lost track of job {} (pid {:?}): {}", entry.job.jobid, entry.pid(), e);
                    finished.push(FinishedJob {
                        job: entry.job,
                        outcome: ExitOutcome::Failed(None),
                    });
                }
            }
        }

        self.entries = still_running;
        finished
    }
}
