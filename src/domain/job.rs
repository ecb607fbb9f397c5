//! Job records and their lifecycle states.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::SjqError;

/// Store-assigned job identifier, monotonically increasing.
pub type JobId = i64;

/// Name used for output files when a submission does not give one.
pub const DEFAULT_JOB_NAME: &str = "sjq";

/// Job state machine.
///
/// Queued -> Running -> Succeeded | Failed. Aborted is reached when a job
/// this one depends on fails. Held <-> Queued is driven by the store's
/// hold policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Held,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl JobState {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Held => "held",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Aborted => "aborted",
        }
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Aborted)
    }

    /// A terminal state that poisons anything depending on the job
    pub fn is_failure(&self) -> bool {
        matches!(self, JobState::Failed | JobState::Aborted)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = SjqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" | "q" => Ok(JobState::Queued),
            "held" | "h" => Ok(JobState::Held),
            "running" | "r" => Ok(JobState::Running),
            "succeeded" | "s" => Ok(JobState::Succeeded),
            "failed" | "f" => Ok(JobState::Failed),
            "aborted" | "a" => Ok(JobState::Aborted),
            other => Err(SjqError::Store(format!("unknown job state: {}", other))),
        }
    }
}

/// A submission as it arrives from a client, before admission.
///
/// Resource fields are optional; the daemon fills in configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobRequest {
    /// Script text; the first line must be `#!<interpreter>`
    pub src: String,
    pub procs: Option<u32>,
    /// Memory quantity as written by the user, e.g. `"2G"`
    pub mem: Option<String>,
    pub name: Option<String>,
    pub cwd: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    /// Comma-separated `KEY=VALUE` pairs
    pub env: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub priority: i32,
    /// Jobs that must succeed before this one may run
    pub depends_on: Vec<JobId>,
    /// Start in the Held state
    pub hold: bool,
    /// Unix timestamp (seconds) after which a held job is released
    pub hold_until: Option<i64>,
}

impl JobRequest {
    /// Create a request for the given script with everything else defaulted.
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            ..Default::default()
        }
    }

    pub fn procs(mut self, procs: u32) -> Self {
        self.procs = Some(procs);
        self
    }

    pub fn mem(mut self, mem: impl Into<String>) -> Self {
        self.mem = Some(mem.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn after(mut self, jobid: JobId) -> Self {
        self.depends_on.push(jobid);
        self
    }

    pub fn held(mut self) -> Self {
        self.hold = true;
        self
    }
}

/// An admitted submission with resources resolved, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub name: String,
    pub src: String,
    pub cwd: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub env: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub procs: u32,
    /// Bytes; `None` means the job declared no memory demand
    pub mem: Option<u64>,
    pub priority: i32,
    pub depends_on: Vec<JobId>,
    pub hold: bool,
    pub hold_until: Option<i64>,
}

impl NewJob {
    /// Resolve a request against already-validated resource values.
    pub fn from_request(request: JobRequest, procs: u32, mem: Option<u64>) -> Self {
        Self {
            name: request
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_JOB_NAME.to_string()),
            src: request.src,
            cwd: request.cwd,
            stdout: request.stdout,
            stderr: request.stderr,
            env: request.env,
            uid: request.uid,
            gid: request.gid,
            procs,
            mem,
            priority: request.priority,
            depends_on: request.depends_on,
            hold: request.hold || request.hold_until.is_some(),
            hold_until: request.hold_until,
        }
    }
}

/// A job as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub jobid: JobId,
    pub name: String,
    pub src: String,
    pub cwd: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub env: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub procs: u32,
    pub mem: Option<u64>,
    pub priority: i32,
    pub state: JobState,
    pub retcode: Option<i32>,
    pub hold_until: Option<i64>,
    /// Unix timestamps in seconds
    pub submitted_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl JobRecord {
    /// Memory demand for accounting; an undeclared demand counts as zero.
    pub fn mem_demand(&self) -> u64 {
        self.mem.unwrap_or(0)
    }
}
