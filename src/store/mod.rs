//! Job store for sjq.
//!
//! The store owns everything durable: job records, their state transitions,
//! the dependency graph and the hold policy. Callers never keep a handle
//! around; each logical operation (one client request, one scheduling tick)
//! opens a session and releases it when done.
//!
//! # Example
//!
//! ```ignore
//! use sjq::store::{JobSession, JobStore, SqliteJobStore};
//!
//! let store = SqliteJobStore::open("/var/lib/sjq/sjq.db")?;
//! let mut session = store.open_session()?;
//! let queued = session.list(Some(JobState::Queued))?;
//! session.release();
//! ```

mod sqlite;

use crate::domain::{JobId, JobRecord, JobState, MemLimit, NewJob};
use crate::error::Result;

pub use sqlite::{SqliteJobStore, SqliteSession};

/// Factory for per-operation store sessions.
///
/// Implementations must tolerate sessions being open concurrently from
/// client handlers and the scheduling task.
pub trait JobStore: Send + Sync {
    type Session: JobSession + Send;

    /// Acquire a session for one logical operation.
    fn open_session(&self) -> Result<Self::Session>;
}

/// Operations available on an open store session.
pub trait JobSession {
    /// Persist a new job and return its assigned id.
    fn submit(&mut self, job: &NewJob) -> Result<JobId>;

    /// Return one Queued job whose dependencies have succeeded and whose
    /// demand fits the given budget, highest priority first.
    fn find_runnable(&mut self, slots: u32, mem: MemLimit) -> Result<Option<JobRecord>>;

    /// Persist a state transition.
    fn update_state(&mut self, jobid: JobId, state: JobState, retcode: Option<i32>) -> Result<()>;

    /// Abort every job that transitively depends on `jobid`. Returns how many were aborted.
    fn abort_dependents(&mut self, jobid: JobId) -> Result<usize>;

    /// Re-evaluate Held jobs against the hold policy. Returns how many were released.
    fn reconcile_held(&mut self) -> Result<usize>;

    fn get(&mut self, jobid: JobId) -> Result<Option<JobRecord>>;

    fn list(&mut self, state: Option<JobState>) -> Result<Vec<JobRecord>>;

    /// Move a Held job back to Queued. Returns false if the job was not Held.
    fn release_hold(&mut self, jobid: JobId) -> Result<bool>;

    /// Give the session back. Dropping it has the same effect.
    fn release(self)
    where
        Self: Sized,
    {
    }
}
