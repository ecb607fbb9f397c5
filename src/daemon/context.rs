//! Daemon context - shared state for request handlers
//!
//! DaemonContext owns the entry points the control surface calls into:
//! admission of new jobs, job queries, and the shutdown sequence. The
//! scheduling engine runs on its own task and is reached only through the
//! wake signal, the shutdown token and the ledger snapshots it publishes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Limits;
use crate::domain::{JobId, JobRecord, JobRequest, JobState, MemLimit, NewJob, parse_mem};
use crate::error::{Result, SjqError};
use crate::scheduler::{Engine, Launcher, LedgerSnapshot, ResourceLedger, TickConfig, TickState};
use crate::store::{JobSession, JobStore};

/// Shared context for all daemon request handlers
pub struct DaemonContext<S: JobStore> {
    store: Arc<S>,
    limits: Limits,
    socket_path: PathBuf,
    wake: Arc<Notify>,
    /// Phase one: the accept loop exits once this is cancelled
    stop_accepting: CancellationToken,
    /// Phase two: observed by the scheduling loop at the top of every tick
    shutdown_flag: CancellationToken,
    snapshots: watch::Receiver<LedgerSnapshot>,
    engine: Mutex<Option<JoinHandle<TickState>>>,
}

impl<S: JobStore + 'static> DaemonContext<S> {
    /// Spawn the scheduling engine and build the context around it.
    pub fn start(
        store: Arc<S>,
        limits: Limits,
        tick: TickConfig,
        launcher: Launcher,
        socket_path: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let wake = Arc::new(Notify::new());
        let shutdown_flag = CancellationToken::new();

        let (engine, snapshots) = Engine::new(
            store.clone(),
            ResourceLedger::new(limits.max_procs, limits.max_mem),
            launcher,
            tick,
            wake.clone(),
            shutdown_flag.clone(),
        );
        let handle = tokio::spawn(engine.run());

        Arc::new(Self {
            store,
            limits,
            socket_path: socket_path.into(),
            wake,
            stop_accepting: CancellationToken::new(),
            shutdown_flag,
            snapshots,
            engine: Mutex::new(Some(handle)),
        })
    }
}

impl<S: JobStore> DaemonContext<S> {
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Token cancelled when the daemon should stop accepting connections.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_accepting.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_accepting.is_cancelled()
    }

    /// Admit a job.
    ///
    /// Returns `Ok(None)` without storing anything when the request can never
    /// fit the configured maxima. Malformed requests are errors.
    pub fn submit_job(&self, request: JobRequest) -> Result<Option<JobId>> {
        let procs = request.procs.unwrap_or(self.limits.default_procs);
        if procs == 0 {
            return Err(SjqError::InvalidSubmission("procs must be at least 1".to_string()));
        }
        let mem = match request.mem.as_deref() {
            Some(s) => Some(parse_mem(s)?),
            None => self.limits.default_mem,
        };

        if procs > self.limits.max_procs {
            info!("Rejected submission: {} procs exceeds maximum {}", procs, self.limits.max_procs);
            return Ok(None);
        }
        if let (Some(m), MemLimit::Bytes(max)) = (mem, self.limits.max_mem) {
            if m > max {
                info!("Rejected submission: {} bytes exceeds maximum {}", m, max);
                return Ok(None);
            }
        }

        let job = NewJob::from_request(request, procs, mem);
        let mut session = self.store.open_session()?;
        let jobid = session.submit(&job)?;
        session.release();

        info!("Job {} ({}) submitted: {} procs, mem {:?}", jobid, job.name, procs, mem);
        self.wake.notify_one();
        Ok(Some(jobid))
    }

    pub fn job(&self, jobid: JobId) -> Result<JobRecord> {
        let mut session = self.store.open_session()?;
        let job = session.get(jobid)?;
        session.release();
        job.ok_or(SjqError::JobNotFound(jobid))
    }

    pub fn jobs(&self, state: Option<JobState>) -> Result<Vec<JobRecord>> {
        let mut session = self.store.open_session()?;
        let jobs = session.list(state)?;
        session.release();
        Ok(jobs)
    }

    /// Move a held job back to the queue. Returns false if it was not held.
    pub fn release_job(&self, jobid: JobId) -> Result<bool> {
        let mut session = self.store.open_session()?;
        let released = session.release_hold(jobid)?;
        session.release();

        if released {
            debug!("Job {} released from hold", jobid);
            self.wake.notify_one();
        }
        Ok(released)
    }

    /// Latest ledger published by the scheduling loop.
    pub fn ledger(&self) -> LedgerSnapshot {
        *self.snapshots.borrow()
    }

    /// Trigger the shutdown sequence. Safe to call any number of times.
    pub fn request_shutdown(&self) {
        if !self.stop_accepting.is_cancelled() {
            info!("Shutdown requested");
        }
        self.stop_accepting.cancel();
    }

    /// Finish shutting down once the accept loop has exited.
    ///
    /// Removes the socket file, stops the scheduling loop and waits for it.
    /// Errors are logged and never returned. Running jobs are left alone.
    pub async fn shutdown(&self) {
        self.stop_accepting.cancel();

        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!("Removed socket {}", self.socket_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove socket {}: {}", self.socket_path.display(), e),
        }

        self.shutdown_flag.cancel();
        self.wake.notify_one();

        let handle = self.engine.lock().await.take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(state) => debug!("Scheduler joined after {} ticks", state.tick_count),
                Err(e) => error!("Scheduler task failed: {}", e),
            }
        }
        info!("Daemon shut down");
    }

    /// True once the scheduling loop has been stopped and joined.
    pub async fn is_shut_down(&self) -> bool {
        self.shutdown_flag.is_cancelled() && self.engine.lock().await.is_none()
    }
}
