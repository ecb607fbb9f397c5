//! Crash Recovery - reconciles jobs interrupted by a daemon restart
//!
//! A job recorded as Running when the daemon starts has no child process
//! the new daemon can observe. Recovery marks each one Failed and aborts
//! whatever depends on it.

use log::{info, warn};

use crate::domain::{JobId, JobState};
use crate::error::Result;
use crate::store::{JobSession, JobStore};

/// Result of recovering a single job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Job was marked failed; `aborted` dependents were aborted with it
    MarkedFailed { jobid: JobId, aborted: usize },
}

/// Mark every job left Running as Failed.
pub fn recover_interrupted<S: JobStore>(store: &S) -> Result<Vec<RecoveryAction>> {
    let mut session = store.open_session()?;
    let interrupted = session.list(Some(JobState::Running))?;

    let mut actions = Vec::with_capacity(interrupted.len());
    for job in interrupted {
        warn!("Job {} ({}) was running when the daemon stopped; marking failed", job.jobid, job.name);
        session.update_state(job.jobid, JobState::Failed, None)?;
        let aborted = session.abort_dependents(job.jobid)?;
        actions.push(RecoveryAction::MarkedFailed {
            jobid: job.jobid,
            aborted,
        });
    }
    session.release();

    if !actions.is_empty() {
        info!("Recovered {} interrupted jobs", actions.len());
    }
    Ok(actions)
}
