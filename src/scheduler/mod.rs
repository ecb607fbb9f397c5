//! Scheduler - admission, launch and reaping of jobs
//!
//! This module provides:
//! - **Ledger**: process slots and memory not held by running jobs
//! - **Launcher**: turns a stored job into a child process
//! - **Running table**: live children, polled without blocking
//! - **Engine**: the tick loop that ties them together
//!
//! The engine is the only writer of the ledger and the running table. Other
//! tasks wake it through a shared `Notify` and read the ledger through the
//! snapshots it publishes after every tick.

pub mod engine;
pub mod launcher;
pub mod ledger;
pub mod running;
pub mod tick;

pub use engine::Engine;
pub use launcher::{Identity, Interpreter, Launcher, SpawnOptions};
pub use ledger::{LedgerSnapshot, ResourceLedger};
pub use running::{ExitOutcome, FinishedJob, RunningJob, RunningTable};
pub use tick::{TickConfig, TickState, TickSummary};
