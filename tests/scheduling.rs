//! Scheduling integration tests
//!
//! Runs the daemon against real /bin/sh scripts in a temporary directory.

use std::sync::Arc;
use std::time::Duration;

use sjq::config::Limits;
use sjq::daemon::{self, DaemonContext};
use sjq::domain::{JobId, JobRequest, JobState};
use sjq::error::SjqError;
use sjq::ipc::{IpcClient, IpcServer, IpcServerConfig};
use sjq::scheduler::{Launcher, TickConfig};
use sjq::store::SqliteJobStore;
use tempfile::TempDir;

type Ctx = Arc<DaemonContext<SqliteJobStore>>;

fn start(dir: &TempDir, limits: Limits, tick: TickConfig) -> Ctx {
    let store = Arc::new(SqliteJobStore::open(dir.path().join("sjq.db")).unwrap());
    DaemonContext::start(
        store,
        limits,
        tick,
        Launcher::with_privilege(false),
        dir.path().join("sjq.sock"),
    )
}

fn fast_ticks() -> TickConfig {
    TickConfig::new(Duration::from_millis(50))
}

fn script(dir: &TempDir, body: &str) -> JobRequest {
    JobRequest::new(format!("#!/bin/sh\n{}\n", body)).cwd(dir.path())
}

fn state(ctx: &Ctx, jobid: JobId) -> JobState {
    ctx.job(jobid).unwrap().state
}

async fn wait_for(ctx: &Ctx, jobid: JobId, want: JobState) {
    for _ in 0..200 {
        if state(ctx, jobid) == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} never reached {:?}, stuck in {:?}", jobid, want, state(ctx, jobid));
}

/// Two slots, three one-slot jobs: two run, the third waits its turn.
#[tokio::test]
async fn test_slots_bound_concurrency() {
    let dir = TempDir::new().unwrap();
    let ctx = start(&dir, Limits::slots(2), fast_ticks());
    let initial = ctx.ledger();

    let ids: Vec<JobId> = (0..3)
        .map(|_| ctx.submit_job(script(&dir, "sleep 0.5")).unwrap().unwrap())
        .collect();

    wait_for(&ctx, ids[0], JobState::Running).await;
    wait_for(&ctx, ids[1], JobState::Running).await;
    assert_eq!(state(&ctx, ids[2]), JobState::Queued);

    let mut max_running = 0;
    for _ in 0..200 {
        let running = ctx.jobs(Some(JobState::Running)).unwrap().len();
        max_running = max_running.max(running);
        if ctx.jobs(Some(JobState::Succeeded)).unwrap().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(max_running <= 2);
    for id in &ids {
        assert_eq!(state(&ctx, *id), JobState::Succeeded);
        assert_eq!(ctx.job(*id).unwrap().retcode, Some(0));
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(ctx.ledger(), initial);
    ctx.shutdown().await;
}

/// A failure aborts every job that depends on it, directly or not.
#[tokio::test]
async fn test_failure_aborts_dependents() {
    let dir = TempDir::new().unwrap();
    let ctx = start(&dir, Limits::slots(2), fast_ticks());

    let a = ctx.submit_job(script(&dir, "exit 1")).unwrap().unwrap();
    let b = ctx.submit_job(script(&dir, "exit 0").after(a)).unwrap().unwrap();
    let c = ctx.submit_job(script(&dir, "exit 0").after(b)).unwrap().unwrap();

    wait_for(&ctx, a, JobState::Failed).await;
    assert_eq!(ctx.job(a).unwrap().retcode, Some(1));
    assert_eq!(state(&ctx, b), JobState::Aborted);
    assert_eq!(state(&ctx, c), JobState::Aborted);

    ctx.shutdown().await;
}

/// Output lands in <name>.o<jobid> in the working directory, with JOB_ID set.
#[tokio::test]
async fn test_job_output_and_environment() {
    let dir = TempDir::new().unwrap();
    let ctx = start(&dir, Limits::slots(1), fast_ticks());

    let req = script(&dir, "echo \"$JOB_ID $GREETING\"\necho oops >&2")
        .name("hello")
        .env("GREETING=hi");
    let jobid = ctx.submit_job(req).unwrap().unwrap();
    wait_for(&ctx, jobid, JobState::Succeeded).await;

    let stdout = std::fs::read_to_string(dir.path().join(format!("hello.o{}", jobid))).unwrap();
    assert_eq!(stdout.trim(), format!("{} hi", jobid));
    let stderr = std::fs::read_to_string(dir.path().join(format!("hello.e{}", jobid))).unwrap();
    assert_eq!(stderr.trim(), "oops");

    ctx.shutdown().await;
}

/// A script without an interpreter line is never launched and stays queued.
#[tokio::test]
async fn test_missing_interpreter_stays_queued() {
    let dir = TempDir::new().unwrap();
    let ctx = start(&dir, Limits::slots(1), fast_ticks());

    let req = JobRequest::new("echo hello\n").cwd(dir.path());
    let jobid = ctx.submit_job(req).unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(state(&ctx, jobid), JobState::Queued);
    assert!(ctx.ledger().is_idle());

    ctx.shutdown().await;
}

/// With fail_on_launch_error the same script is failed instead.
#[tokio::test]
async fn test_missing_interpreter_fails_when_configured() {
    let dir = TempDir::new().unwrap();
    let ctx = start(&dir, Limits::slots(1), fast_ticks().with_fail_on_launch_error(true));

    let jobid = ctx.submit_job(JobRequest::new("echo hello\n").cwd(dir.path())).unwrap().unwrap();
    wait_for(&ctx, jobid, JobState::Failed).await;
    assert_eq!(ctx.job(jobid).unwrap().retcode, None);

    ctx.shutdown().await;
}

/// Submission wakes the loop instead of waiting out the idle timeout.
#[tokio::test]
async fn test_submit_wakes_scheduler() {
    let dir = TempDir::new().unwrap();
    let ctx = start(&dir, Limits::slots(1), TickConfig::new(Duration::from_secs(60)));

    // Let the first tick run and the loop go idle
    tokio::time::sleep(Duration::from_millis(100)).await;

    let jobid = ctx.submit_job(script(&dir, "sleep 0.2")).unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(5), wait_for(&ctx, jobid, JobState::Running))
        .await
        .unwrap();

    ctx.shutdown().await;
}

/// Requests above the configured maxima are refused and leave no record.
#[tokio::test]
async fn test_oversized_submission_rejected() {
    let dir = TempDir::new().unwrap();
    let ctx = start(&dir, Limits::slots(2).with_max_mem(1 << 20), fast_ticks());

    assert_eq!(ctx.submit_job(script(&dir, "true").procs(3)).unwrap(), None);
    assert_eq!(ctx.submit_job(script(&dir, "true").mem("2M")).unwrap(), None);
    assert!(ctx.submit_job(script(&dir, "true").mem("1M")).unwrap().is_some());
    assert_eq!(ctx.jobs(None).unwrap().len(), 1);

    ctx.shutdown().await;
}

/// Held jobs wait for release.
#[tokio::test]
async fn test_held_job_runs_after_release() {
    let dir = TempDir::new().unwrap();
    let ctx = start(&dir, Limits::slots(1), fast_ticks());

    let jobid = ctx.submit_job(script(&dir, "exit 0").held()).unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state(&ctx, jobid), JobState::Held);

    assert!(ctx.release_job(jobid).unwrap());
    wait_for(&ctx, jobid, JobState::Succeeded).await;

    ctx.shutdown().await;
}

/// Shutdown over the socket stops the loop and removes the socket while a job still runs.
#[tokio::test]
async fn test_shutdown_with_running_job() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("sjq.sock");
    let server = IpcServer::bind(IpcServerConfig::default().with_socket_path(&socket_path)).unwrap();
    let ctx = start(&dir, Limits::slots(1), fast_ticks());
    let serving = tokio::spawn(daemon::serve(ctx.clone(), server));

    let mut client = IpcClient::connect_to(&socket_path).await.unwrap();
    let jobid = client.submit(&script(&dir, "sleep 2")).await.unwrap().unwrap();
    wait_for(&ctx, jobid, JobState::Running).await;

    client.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();

    assert!(!socket_path.exists());
    assert!(ctx.is_shut_down().await);
    assert_eq!(state(&ctx, jobid), JobState::Running);
}

/// A leftover socket blocks start-up rather than being removed.
#[tokio::test]
async fn test_existing_socket_blocks_start() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("sjq.sock");
    std::fs::write(&socket_path, "").unwrap();

    let result = IpcServer::bind(IpcServerConfig::default().with_socket_path(&socket_path));
    assert!(matches!(result, Err(SjqError::SocketExists(_))));
    assert!(socket_path.exists());
}
