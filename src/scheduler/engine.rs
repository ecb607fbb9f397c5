//! Scheduling loop.
//!
//! The engine owns the resource ledger and the running table. Each tick it
//! reaps finished children, re-evaluates held jobs, then launches queued jobs
//! that fit in what is left. Between ticks it sleeps until woken or until the
//! idle timeout passes.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

use crate::domain::{JobRecord, JobState};
use crate::error::Result;
use crate::scheduler::launcher::Launcher;
use crate::scheduler::ledger::{LedgerSnapshot, ResourceLedger};
use crate::scheduler::running::{ExitOutcome, FinishedJob, RunningTable};
use crate::scheduler::tick::{TickConfig, TickState, TickSummary};
use crate::store::{JobSession, JobStore};

/// The single owner of scheduling state.
pub struct Engine<S: JobStore> {
    store: Arc<S>,
    launcher: Launcher,
    ledger: ResourceLedger,
    running: RunningTable,
    config: TickConfig,
    state: TickState,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    snapshot_tx: watch::Sender<LedgerSnapshot>,
}

impl<S: JobStore> Engine<S> {
    pub fn new(
        store: Arc<S>,
        ledger: ResourceLedger,
        launcher: Launcher,
        config: TickConfig,
        wake: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> (Self, watch::Receiver<LedgerSnapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(ledger.snapshot(0));
        let engine = Self {
            store,
            launcher,
            ledger,
            running: RunningTable::new(),
            config,
            state: TickState::new(),
            wake,
            shutdown,
            snapshot_tx,
        };
        (engine, snapshot_rx)
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn running(&self) -> &RunningTable {
        &self.running
    }

    pub fn state(&self) -> &TickState {
        &self.state
    }

    /// Run ticks until the shutdown token is cancelled.
    ///
    /// A failed tick is logged and the loop carries on. Children still running
    /// at exit are left alone.
    pub async fn run(mut self) -> TickState {
        info!(
            "Scheduler started: {} slots, {} memory, idle timeout {:?}",
            self.ledger.available_slots(),
            self.ledger.available_mem(),
            self.config.idle_timeout
        );

        while !self.shutdown.is_cancelled() {
            if let Err(e) = self.tick() {
                error!("Scheduler tick failed: {}", e);
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.idle_timeout) => {}
            }
        }

        if !self.running.is_empty() {
            info!("Scheduler stopping with {} jobs still running: {:?}", self.running.len(), self.running.jobids());
        }
        info!(
            "Scheduler stopped after {} ticks ({} started, {} succeeded, {} failed)",
            self.state.tick_count, self.state.total_started, self.state.total_succeeded, self.state.total_failed
        );
        self.state
    }

    /// One pass of reap, reconcile and admit.
    pub fn tick(&mut self) -> Result<TickSummary> {
        let mut summary = TickSummary::default();
        let mut session = self.store.open_session()?;

        let result = self.tick_with(&mut session, &mut summary);
        session.release();

        self.state.record(&summary);
        self.publish();
        result.map(|_| summary)
    }

    fn tick_with(&mut self, session: &mut S::Session, summary: &mut TickSummary) -> Result<()> {
        for finished in self.running.reap() {
            self.finish(session, finished, summary);
        }

        summary.released = session.reconcile_held()?;
        if summary.released > 0 {
            debug!("{} held jobs released", summary.released);
        }

        self.admit(session, summary)
    }

    /// Record a reaped job's outcome and hand back its resources.
    fn finish(&mut self, session: &mut S::Session, finished: FinishedJob, summary: &mut TickSummary) {
        let FinishedJob { job, outcome } = finished;

        let retcode = outcome.retcode();
        let state = match outcome {
            ExitOutcome::Succeeded => {
                summary.succeeded += 1;
                info!("Job {} ({}) succeeded", job.jobid, job.name);
                JobState::Succeeded
            }
            ExitOutcome::Failed(_) => {
                summary.failed += 1;
                warn!("Job {} ({}) failed with code {:?}", job.jobid, job.name, retcode);
                JobState::Failed
            }
        };

        if let Err(e) = session.update_state(job.jobid, state, retcode) {
            error!("Failed to record exit of job {}: {}", job.jobid, e);
        }
        if state == JobState::Failed {
            summary.aborted += self.abort_dependents(session, &job);
        }

        if !self.ledger.release(job.procs, job.mem_demand()) {
            warn!("Ledger release for job {} exceeded the configured maxima", job.jobid);
        }
    }

    fn abort_dependents(&self, session: &mut S::Session, job: &JobRecord) -> usize {
        match session.abort_dependents(job.jobid) {
            Ok(0) => 0,
            Ok(n) => {
                info!("Aborted {} jobs depending on job {}", n, job.jobid);
                n
            }
            Err(e) => {
                error!("Failed to abort dependents of job {}: {}", job.jobid, e);
                0
            }
        }
    }

    /// Launch runnable jobs until none fits.
    fn admit(&mut self, session: &mut S::Session, summary: &mut TickSummary) -> Result<()> {
        loop {
            let slots = self.ledger.available_slots();
            let mem = self.ledger.available_mem();
            debug!("PROC available: {}, MEM available: {}", slots, mem);

            if slots == 0 {
                return Ok(());
            }
            let Some(job) = session.find_runnable(slots, mem)? else {
                return Ok(());
            };

            // A previous tick launched it but failed to record that
            if self.running.contains(job.jobid) {
                session.update_state(job.jobid, JobState::Running, None)?;
                continue;
            }

            if !self.ledger.reserve(job.procs, job.mem_demand()) {
                // find_runnable filters on the same figures
                error!("Job {} does not fit the ledger", job.jobid);
                return Ok(());
            }

            match self.launcher.launch(&job) {
                Ok(child) => {
                    info!("Job {} ({}) started, pid {:?}", job.jobid, job.name, child.id());
                    let jobid = job.jobid;
                    self.running.insert(child, job);
                    summary.started += 1;
                    session.update_state(jobid, JobState::Running, None)?;
                }
                Err(e) => {
                    self.ledger.release(job.procs, job.mem_demand());
                    summary.launch_errors += 1;
                    warn!("Job {} ({}) could not be launched: {}", job.jobid, job.name, e);
                    if !self.config.fail_on_launch_error {
                        // Stays queued; retried next tick
                        return Ok(());
                    }
                    session.update_state(job.jobid, JobState::Failed, None)?;
                    summary.failed += 1;
                    summary.aborted += self.abort_dependents(session, &job);
                }
            }
        }
    }

    fn publish(&self) {
        let snapshot = self.ledger.snapshot(self.running.len());
        self.snapshot_tx.send_replace(snapshot);
    }
}
