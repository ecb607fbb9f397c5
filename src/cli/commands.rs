//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - daemon: run the scheduler daemon
//! - submit: submit a job script
//! - status/list/release/ledger: query and steer queued jobs
//! - shutdown: stop the daemon

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sjq::domain::{JobId, JobState};

/// sjq - single-node batch job queue
#[derive(Parser, Debug)]
#[command(name = "sjq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// True when logs should go to stderr instead of the log file
    pub fn logs_to_stderr(&self) -> bool {
        matches!(self.command, Commands::Daemon { foreground: true })
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler daemon until it is shut down
    Daemon {
        /// Log to stderr instead of the log file
        #[arg(short, long)]
        foreground: bool,
    },

    /// Submit a job script
    Submit(SubmitArgs),

    /// Show one job
    Status {
        /// Job ID to show
        jobid: JobId,
    },

    /// List jobs
    List {
        /// Filter by state (queued, held, running, succeeded, failed, aborted)
        #[arg(short, long)]
        state: Option<JobState>,
    },

    /// Release a held job
    Release {
        /// Job ID to release
        jobid: JobId,
    },

    /// Show free process slots and memory
    Ledger,

    /// Stop the daemon; running jobs are left alone
    Shutdown,
}

/// Arguments for `sjq submit`
#[derive(clap::Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Script file; reads stdin when omitted or `-`
    pub script: Option<PathBuf>,

    /// Process slots the job needs
    #[arg(short, long)]
    pub procs: Option<u32>,

    /// Memory the job needs, e.g. 512M or 2G
    #[arg(short, long)]
    pub mem: Option<String>,

    /// Job name, used for default output file names
    #[arg(short = 'N', long)]
    pub name: Option<String>,

    /// Working directory (defaults to the current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Stdout file, relative to the working directory
    #[arg(short = 'o', long)]
    pub stdout: Option<PathBuf>,

    /// Stderr file, relative to the working directory
    #[arg(short = 'e', long)]
    pub stderr: Option<PathBuf>,

    /// Extra environment, as KEY=VALUE,KEY=VALUE
    #[arg(long)]
    pub env: Option<String>,

    /// Run as this user id (daemon must be root)
    #[arg(long)]
    pub uid: Option<u32>,

    /// Run as this group id (daemon must be root)
    #[arg(long)]
    pub gid: Option<u32>,

    /// Higher runs first
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub priority: i32,

    /// Job IDs that must succeed first
    #[arg(short, long, value_delimiter = ',')]
    pub after: Vec<JobId>,

    /// Submit held; run `sjq release` to queue it
    #[arg(long)]
    pub hold: bool,

    /// Hold for this many seconds, then queue automatically
    #[arg(long)]
    pub hold_for: Option<u64>,
}
