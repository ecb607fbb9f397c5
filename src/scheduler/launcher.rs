//! Process launcher.
//!
//! Turns a job record into a live child process: the interpreter comes from
//! the script's `#!` line, the script body is fed through an anonymous
//! temporary file on stdin, and output goes to the job's stdout/stderr files.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::debug;
use tokio::process::{Child, Command};

use crate::domain::JobRecord;
use crate::error::{Result, SjqError};

/// Marker that must open the first line of every job script.
pub const INTERPRETER_MARKER: &str = "#!";

/// Environment variable carrying the job id into the child.
pub const JOB_ID_VAR: &str = "JOB_ID";

/// Target identity for a demoted child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Identity {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Identity {
    pub fn is_empty(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }
}

/// Interpreter command parsed from a `#!` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
}

/// Everything needed to start one job, resolved before anything is spawned.
#[derive(Debug)]
pub struct SpawnOptions {
    pub interpreter: Interpreter,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub stdin: File,
    pub stdout: File,
    pub stderr: File,
    /// Applied in the child before exec, group first
    pub identity: Option<Identity>,
}

impl SpawnOptions {
    /// Start the interpreter with the prepared stdio, environment and identity.
    pub fn spawn(self) -> Result<Child> {
        let mut cmd = Command::new(&self.interpreter.program);
        cmd.args(&self.interpreter.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::from(self.stdin))
            .stdout(Stdio::from(self.stdout))
            .stderr(Stdio::from(self.stderr));

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        // The child calls setgid before setuid; dropping the user first
        // would leave it unable to change group.
        if let Some(identity) = self.identity {
            if let Some(gid) = identity.gid {
                cmd.gid(gid);
            }
            if let Some(uid) = identity.uid {
                cmd.uid(uid);
            }
        }

        cmd.spawn().map_err(|e| {
            SjqError::Launch(format!("failed to start {}: {}", self.interpreter.program, e))
        })
    }
}

/// Builds and spawns child processes for jobs.
#[derive(Debug, Clone, Copy)]
pub struct Launcher {
    privileged: bool,
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher {
    /// Launcher that demotes children only when the daemon runs as root.
    pub fn new() -> Self {
        Self {
            privileged: nix::unistd::geteuid().is_root(),
        }
    }

    /// Launcher with an explicit privilege setting.
    pub fn with_privilege(privileged: bool) -> Self {
        Self { privileged }
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Resolve everything the child needs. Output files are created (and
    /// truncated) here, before any process exists.
    pub fn prepare(&self, job: &JobRecord) -> Result<SpawnOptions> {
        let interpreter = parse_interpreter(&job.src)?;
        let cwd = resolve_cwd(job.cwd.as_deref());

        let stdout_path = resolve_output(job.stdout.as_deref(), &cwd, &job.name, 'o', job.jobid);
        let stderr_path = resolve_output(job.stderr.as_deref(), &cwd, &job.name, 'e', job.jobid);
        let stdout = open_output(&stdout_path)?;
        let stderr = open_output(&stderr_path)?;

        let mut env = parse_env(job.env.as_deref())?;
        env.retain(|(k, _)| k != JOB_ID_VAR);
        env.push((JOB_ID_VAR.to_string(), job.jobid.to_string()));

        let stdin = script_stdin(&job.src)?;

        let identity = if self.privileged {
            Some(Identity {
                uid: job.uid,
                gid: job.gid,
            })
            .filter(|id| !id.is_empty())
        } else {
            None
        };

        debug!(
            "Prepared job {}: {:?} in {} (stdout={}, stderr={})",
            job.jobid,
            interpreter.program,
            cwd.display(),
            stdout_path.display(),
            stderr_path.display()
        );

        Ok(SpawnOptions {
            interpreter,
            cwd,
            env,
            stdin,
            stdout,
            stderr,
            identity,
        })
    }

    /// Prepare and spawn a job. The caller owns reaping the child.
    pub fn launch(&self, job: &JobRecord) -> Result<Child> {
        self.prepare(job)?.spawn()
    }
}

/// Read the interpreter from the script's first line.
pub fn parse_interpreter(src: &str) -> Result<Interpreter> {
    let first = src.lines().next().unwrap_or("").trim();
    let Some(rest) = first.strip_prefix(INTERPRETER_MARKER) else {
        return Err(SjqError::Launch(format!("don't know how to run job: {:?}", first)));
    };

    let mut parts = rest.split_whitespace().map(str::to_string);
    let Some(program) = parts.next() else {
        return Err(SjqError::Launch("empty interpreter line".to_string()));
    };

    Ok(Interpreter {
        program,
        args: parts.collect(),
    })
}

/// Working directory for a job: as given, or the home directory.
pub fn resolve_cwd(cwd: Option<&Path>) -> PathBuf {
    match cwd {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
    }
}

/// Output path for a job stream.
///
/// Absolute paths are used as-is, relative ones are joined to `cwd`, and a
/// missing path becomes `<cwd>/<name>.<stream><jobid>`.
pub fn resolve_output(explicit: Option<&Path>, cwd: &Path, name: &str, stream: char, jobid: i64) -> PathBuf {
    match explicit {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) if !path.as_os_str().is_empty() => cwd.join(path),
        _ => cwd.join(format!("{}.{}{}", name, stream, jobid)),
    }
}

/// Parse comma-separated `KEY=VALUE` pairs.
pub fn parse_env(env: Option<&str>) -> Result<Vec<(String, String)>> {
    let Some(env) = env else {
        return Ok(Vec::new());
    };

    env.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
            _ => Err(SjqError::Launch(format!("invalid environment entry: {:?}", pair))),
        })
        .collect()
}

fn open_output(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| SjqError::Launch(format!("cannot open {}: {}", path.display(), e)))
}

/// Write the script into an unnamed temporary file positioned at its start.
fn script_stdin(src: &str) -> Result<File> {
    let mut file = tempfile::tempfile()?;
    file.write_all(src.as_bytes())?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobState;
    use tempfile::TempDir;

    fn record(src: &str, cwd: &Path) -> JobRecord {
        JobRecord {
            jobid: 7,
            name: "test".to_string(),
            src: src.to_string(),
            cwd: Some(cwd.to_path_buf()),
            stdout: None,
            stderr: None,
            env: None,
            uid: None,
            gid: None,
            procs: 1,
            mem: None,
            priority: 0,
            state: JobState::Queued,
            retcode: None,
            hold_until: None,
            submitted_at: 0,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_parse_interpreter() {
        let interp = parse_interpreter("#!/bin/sh\necho hi\n").unwrap();
        assert_eq!(interp.program, "/bin/sh");
        assert!(interp.args.is_empty());
    }

    #[test]
    fn test_parse_interpreter_with_args() {
        let interp = parse_interpreter("  #! /usr/bin/env python3 -u\nprint(1)\n").unwrap();
        assert_eq!(interp.program, "/usr/bin/env");
        assert_eq!(interp.args, vec!["python3".to_string(), "-u".to_string()]);
    }

    #[test]
    fn test_parse_interpreter_missing_marker() {
        assert!(matches!(parse_interpreter("echo hi\n"), Err(SjqError::Launch(_))));
        assert!(matches!(parse_interpreter(""), Err(SjqError::Launch(_))));
        assert!(matches!(parse_interpreter("#!\n"), Err(SjqError::Launch(_))));
    }

    #[test]
    fn test_parse_interpreter_only_checks_first_line() {
        assert!(parse_interpreter("\n#!/bin/sh\n").is_err());
    }

    #[test]
    fn test_resolve_output_default() {
        let path = resolve_output(None, Path::new("/work"), "build", 'o', 12);
        assert_eq!(path, PathBuf::from("/work/build.o12"));
        let path = resolve_output(None, Path::new("/work"), "build", 'e', 12);
        assert_eq!(path, PathBuf::from("/work/build.e12"));
    }

    #[test]
    fn test_resolve_output_absolute_and_relative() {
        let abs = resolve_output(Some(Path::new("/var/log/out.txt")), Path::new("/work"), "n", 'o', 1);
        assert_eq!(abs, PathBuf::from("/var/log/out.txt"));
        let rel = resolve_output(Some(Path::new("logs/out.txt")), Path::new("/work"), "n", 'o', 1);
        assert_eq!(rel, PathBuf::from("/work/logs/out.txt"));
    }

    #[test]
    fn test_resolve_cwd_defaults_to_home() {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        assert_eq!(resolve_cwd(None), home);
        assert_eq!(resolve_cwd(Some(Path::new("/tmp"))), PathBuf::from("/tmp"));
    }

    #[test]
    fn test_parse_env() {
        let env = parse_env(Some("A=1, B=two=2,,C=")).unwrap();
        assert_eq!(
            env,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two=2".to_string()),
                ("C".to_string(), String::new()),
            ]
        );
        assert!(parse_env(None).unwrap().is_empty());
        assert!(parse_env(Some("NOEQUALS")).is_err());
        assert!(parse_env(Some("=value")).is_err());
    }

    #[test]
    fn test_prepare_overrides_job_id() {
        let dir = TempDir::new().unwrap();
        let mut job = record("#!/bin/sh\ntrue\n", dir.path());
        job.env = Some("JOB_ID=bogus,X=1".to_string());

        let opts = Launcher::with_privilege(false).prepare(&job).unwrap();
        let job_ids: Vec<_> = opts.env.iter().filter(|(k, _)| k == JOB_ID_VAR).collect();
        assert_eq!(job_ids.len(), 1);
        assert_eq!(job_ids[0].1, "7");
        assert!(opts.env.contains(&("X".to_string(), "1".to_string())));
    }

    #[test]
    fn test_prepare_creates_and_truncates_outputs() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("test.o7");
        std::fs::write(&stale, "old contents").unwrap();

        let job = record("#!/bin/sh\ntrue\n", dir.path());
        Launcher::with_privilege(false).prepare(&job).unwrap();

        assert_eq!(std::fs::read_to_string(&stale).unwrap(), "");
        assert!(dir.path().join("test.e7").exists());
    }

    #[test]
    fn test_prepare_unopenable_output_is_launch_error() {
        let dir = TempDir::new().unwrap();
        let mut job = record("#!/bin/sh\ntrue\n", dir.path());
        job.stdout = Some(PathBuf::from("/nonexistent-dir/out"));
        assert!(matches!(
            Launcher::with_privilege(false).prepare(&job),
            Err(SjqError::Launch(_))
        ));
    }

    #[test]
    fn test_identity_only_when_privileged() {
        let dir = TempDir::new().unwrap();
        let mut job = record("#!/bin/sh\ntrue\n", dir.path());
        job.uid = Some(1000);
        job.gid = Some(1000);

        let opts = Launcher::with_privilege(false).prepare(&job).unwrap();
        assert!(opts.identity.is_none());

        let opts = Launcher::with_privilege(true).prepare(&job).unwrap();
        assert_eq!(
            opts.identity,
            Some(Identity {
                uid: Some(1000),
                gid: Some(1000)
            })
        );
    }

    #[test]
    fn test_privileged_without_target_identity() {
        let dir = TempDir::new().unwrap();
        let job = record("#!/bin/sh\ntrue\n", dir.path());
        let opts = Launcher::with_privilege(true).prepare(&job).unwrap();
        assert!(opts.identity.is_none());
    }

    #[tokio::test]
    async fn test_launch_runs_script_from_stdin() {
        let dir = TempDir::new().unwrap();
        let mut job = record("#!/bin/sh\necho \"job $JOB_ID says $GREETING\"\necho oops >&2\nexit 3\n", dir.path());
        job.env = Some("GREETING=hello".to_string());

        let mut child = Launcher::with_privilege(false).launch(&job).unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));

        let out = std::fs::read_to_string(dir.path().join("test.o7")).unwrap();
        assert_eq!(out, "job 7 says hello\n");
        let err = std::fs::read_to_string(dir.path().join("test.e7")).unwrap();
        assert_eq!(err, "oops\n");
    }

    #[tokio::test]
    async fn test_launch_missing_cwd_fails() {
        let dir = TempDir::new().unwrap();
        let mut job = record("#!/bin/sh\ntrue\n", dir.path());
        job.stdout = Some(dir.path().join("out"));
        job.stderr = Some(dir.path().join("err"));
        job.cwd = Some(dir.path().join("missing"));
        assert!(matches!(
            Launcher::with_privilege(false).launch(&job),
            Err(SjqError::Launch(_))
        ));
    }
}
