//! SQLite-backed job store.
//!
//! One database file holds the `jobs` table and the `job_deps` edge list.
//! Every session opens its own connection, so client handlers and the
//! scheduling task never share a `Connection`. WAL mode plus a busy timeout
//! lets them run side by side without spurious `SQLITE_BUSY` failures.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::domain::{JobId, JobRecord, JobState, MemLimit, NewJob};
use crate::error::{Result, SjqError};
use crate::store::{JobSession, JobStore};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const JOB_COLUMNS: &str = "jobid, name, src, cwd, stdout, stderr, env, uid, gid, procs, mem, priority, \
                           state, retcode, hold_until, submitted_at, started_at, finished_at";

/// Job store persisted in a single SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    db_path: PathBuf,
}

impl SqliteJobStore {
    /// Open or create the store at `db_path`, creating parent directories
    /// and the schema as needed.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let db = Connection::open(&db_path)?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        db.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init_schema(&db)?;

        Ok(Self { db_path })
    }

    /// Path to the database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                jobid INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                src TEXT NOT NULL,
                cwd TEXT,
                stdout TEXT,
                stderr TEXT,
                env TEXT,
                uid INTEGER,
                gid INTEGER,
                procs INTEGER NOT NULL,
                mem INTEGER,
                priority INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                retcode INTEGER,
                hold_until INTEGER,
                submitted_at INTEGER NOT NULL,
                started_at INTEGER,
                finished_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);

            CREATE TABLE IF NOT EXISTS job_deps (
                jobid INTEGER NOT NULL,
                depends_on INTEGER NOT NULL,
                PRIMARY KEY (jobid, depends_on)
            );

            CREATE INDEX IF NOT EXISTS idx_job_deps_parent ON job_deps(depends_on);
            "#,
        )?;
        Ok(())
    }
}

impl JobStore for SqliteJobStore {
    type Session = SqliteSession;

    fn open_session(&self) -> Result<SqliteSession> {
        let db = Connection::open(&self.db_path)?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        Ok(SqliteSession { db })
    }
}

/// A single connection to the job database, scoped to one logical operation.
pub struct SqliteSession {
    db: Connection,
}

impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession").finish_non_exhaustive()
    }
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

fn path_to_sql(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.to_string_lossy().into_owned())
}

/// Clamp an unsigned byte count into SQLite's signed integer range.
fn mem_to_sql(mem: u64) -> i64 {
    i64::try_from(mem).unwrap_or(i64::MAX)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let state: String = row.get(12)?;
    let state = state.parse::<JobState>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let mem: Option<i64> = row.get(10)?;

    Ok(JobRecord {
        jobid: row.get(0)?,
        name: row.get(1)?,
        src: row.get(2)?,
        cwd: row.get::<_, Option<String>>(3)?.map(PathBuf::from),
        stdout: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
        stderr: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
        env: row.get(6)?,
        uid: row.get(7)?,
        gid: row.get(8)?,
        procs: row.get(9)?,
        mem: mem.map(|m| m.max(0) as u64),
        priority: row.get(11)?,
        state,
        retcode: row.get(13)?,
        hold_until: row.get(14)?,
        submitted_at: row.get(15)?,
        started_at: row.get(16)?,
        finished_at: row.get(17)?,
    })
}

fn state_of(db: &Connection, jobid: JobId) -> Result<Option<JobState>> {
    let state: Option<String> = db
        .query_row("SELECT state FROM jobs WHERE jobid = ?1", [jobid], |row| row.get(0))
        .optional()?;
    state.map(|s| s.parse::<JobState>()).transpose()
}

impl JobSession for SqliteSession {
    fn submit(&mut self, job: &NewJob) -> Result<JobId> {
        // Dependency states are read under the write lock so a parent cannot
        // fail between the check and the insert of its job_deps row
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut initial = if job.hold { JobState::Held } else { JobState::Queued };

        for dep in &job.depends_on {
            match state_of(&tx, *dep)? {
                None => {
                    return Err(SjqError::InvalidSubmission(format!("unknown dependency: {}", dep)));
                }
                Some(state) if state.is_failure() => initial = JobState::Aborted,
                Some(_) => {}
            }
        }

        let now = now_secs();
        let finished_at = if initial == JobState::Aborted { Some(now) } else { None };

        tx.execute(
            r#"
            INSERT INTO jobs
            (name, src, cwd, stdout, stderr, env, uid, gid, procs, mem, priority,
             state, hold_until, submitted_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                job.name,
                job.src,
                path_to_sql(&job.cwd),
                path_to_sql(&job.stdout),
                path_to_sql(&job.stderr),
                job.env,
                job.uid,
                job.gid,
                job.procs,
                job.mem.map(mem_to_sql),
                job.priority,
                initial.as_str(),
                job.hold_until,
                now,
                finished_at,
            ],
        )?;
        let jobid = tx.last_insert_rowid();

        for dep in &job.depends_on {
            tx.execute(
                "INSERT OR IGNORE INTO job_deps (jobid, depends_on) VALUES (?1, ?2)",
                params![jobid, dep],
            )?;
        }
        tx.commit()?;

        Ok(jobid)
    }

    fn find_runnable(&mut self, slots: u32, mem: MemLimit) -> Result<Option<JobRecord>> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs j
            WHERE j.state = 'queued'
              AND j.procs <= ?1
              AND (?2 IS NULL OR COALESCE(j.mem, 0) <= ?2)
              AND NOT EXISTS (
                  SELECT 1 FROM job_deps d
                  JOIN jobs p ON p.jobid = d.depends_on
                  WHERE d.jobid = j.jobid AND p.state != 'succeeded'
              )
            ORDER BY j.priority DESC, j.jobid ASC
            LIMIT 1
            "#
        );
        let record = self
            .db
            .query_row(&sql, params![slots, mem.bytes().map(mem_to_sql)], row_to_record)
            .optional()?;
        Ok(record)
    }

    fn update_state(&mut self, jobid: JobId, state: JobState, retcode: Option<i32>) -> Result<()> {
        let now = now_secs();
        let changed = match state {
            JobState::Running => self.db.execute(
                "UPDATE jobs SET state = ?1, retcode = ?2, started_at = ?3 WHERE jobid = ?4",
                params![state.as_str(), retcode, now, jobid],
            )?,
            s if s.is_terminal() => self.db.execute(
                "UPDATE jobs SET state = ?1, retcode = ?2, finished_at = ?3 WHERE jobid = ?4",
                params![state.as_str(), retcode, now, jobid],
            )?,
            _ => self.db.execute(
                "UPDATE jobs SET state = ?1, retcode = ?2 WHERE jobid = ?3",
                params![state.as_str(), retcode, jobid],
            )?,
        };

        if changed == 0 {
            return Err(SjqError::JobNotFound(jobid));
        }
        Ok(())
    }

    fn abort_dependents(&mut self, jobid: JobId) -> Result<usize> {
        let now = now_secs();
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut aborted = 0;
        let mut frontier = VecDeque::from([jobid]);

        while let Some(parent) = frontier.pop_front() {
            let dependents: Vec<JobId> = {
                let mut stmt = tx.prepare("SELECT jobid FROM job_deps WHERE depends_on = ?1")?;
                let rows = stmt.query_map([parent], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            for child in dependents {
                let changed = tx.execute(
                    "UPDATE jobs SET state = 'aborted', finished_at = ?1 \
                     WHERE jobid = ?2 AND state IN ('queued', 'held')",
                    params![now, child],
                )?;
                if changed > 0 {
                    aborted += 1;
                    frontier.push_back(child);
                }
            }
        }

        tx.commit()?;
        Ok(aborted)
    }

    fn reconcile_held(&mut self) -> Result<usize> {
        let released = self.db.execute(
            "UPDATE jobs SET state = 'queued' \
             WHERE state = 'held' AND hold_until IS NOT NULL AND hold_until <= ?1",
            [now_secs()],
        )?;
        Ok(released)
    }

    fn get(&mut self, jobid: JobId) -> Result<Option<JobRecord>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE jobid = ?1");
        let record = self.db.query_row(&sql, [jobid], row_to_record).optional()?;
        Ok(record)
    }

    fn list(&mut self, state: Option<JobState>) -> Result<Vec<JobRecord>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE (?1 IS NULL OR state = ?1) ORDER BY jobid");
        let mut stmt = self.db.prepare(&sql)?;
        let rows = stmt.query_map([state.map(|s| s.as_str())], row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn release_hold(&mut self, jobid: JobId) -> Result<bool> {
        if state_of(&self.db, jobid)?.is_none() {
            return Err(SjqError::JobNotFound(jobid));
        }
        let changed = self.db.execute(
            "UPDATE jobs SET state = 'queued', hold_until = NULL WHERE jobid = ?1 AND state = 'held'",
            [jobid],
        )?;
        Ok(changed > 0)
    }
}
