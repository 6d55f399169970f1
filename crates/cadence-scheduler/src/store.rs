use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument, warn};

use crate::db::{init_db, opt_ts_from_sql, ts_from_sql, ts_to_sql};
use crate::error::{Result, SchedulerError};
use crate::types::{ExecutionStatus, JobExecution, ScheduledJob};

/// Persistence contract the scheduler depends on.
///
/// Every method is atomic on its own; nothing here spans calls in a
/// transaction. Implementations must be shareable across tasks.
pub trait JobStore: Send + Sync {
    fn find_job_by_name(&self, name: &str) -> Result<Option<ScheduledJob>>;

    /// Create the job if `name` is unknown (enabled, due now), otherwise
    /// persist only the fields that differ. Never creates a second row.
    fn upsert_job_definition(
        &self,
        name: &str,
        handler_id: &str,
        interval_minutes: i64,
        description: &str,
    ) -> Result<ScheduledJob>;

    /// Enabled jobs whose `next_run_at` is NULL or not after `now`.
    fn find_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>>;

    fn count_pending_executions(&self, job_id: i64) -> Result<i64>;

    /// Unconditionally insert a `pending` execution and return its id.
    fn insert_execution(&self, job_id: i64, started_at: DateTime<Utc>) -> Result<i64>;

    /// Insert a `pending` execution only if the job is enabled, due at
    /// `started_at` and has no pending execution, as one atomic statement.
    /// `None` means the run must not start.
    fn try_insert_pending_execution(
        &self,
        job_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<Option<i64>>;

    /// Move a pending execution to a terminal status. Rows that are no longer
    /// pending are left untouched.
    fn complete_execution(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        completed_at: DateTime<Utc>,
        duration_ms: i64,
        error_message: Option<&str>,
    ) -> Result<()>;

    fn update_job_schedule(
        &self,
        job_id: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()>;

    /// [`complete_execution`](Self::complete_execution) and
    /// [`update_job_schedule`](Self::update_job_schedule) in one transaction,
    /// so no dispatch pass can observe a finished run with an old schedule.
    ///
    /// A `next_run_at` of `None` means the job cannot be rescheduled; it is
    /// disabled instead.
    fn finish_execution(&self, finished: &FinishedExecution<'_>) -> Result<()>;

    /// Fail every execution still `pending`. Only meaningful at startup,
    /// when no execution of this process can be in flight yet.
    fn fail_orphaned_executions(&self, now: DateTime<Utc>, message: &str) -> Result<usize>;

    fn set_job_enabled(&self, name: &str, enabled: bool) -> Result<()>;

    fn list_jobs(&self) -> Result<Vec<ScheduledJob>>;

    /// Newest first, optionally restricted to one job.
    fn list_executions(&self, job_id: Option<i64>, limit: usize) -> Result<Vec<JobExecution>>;

    /// Delete terminal executions completed before `older_than`. Pending rows
    /// are never pruned.
    fn prune_executions(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

/// Terminal result of one attempt plus the schedule it leaves behind.
#[derive(Debug, Clone)]
pub struct FinishedExecution<'a> {
    pub execution_id: i64,
    pub job_id: i64,
    pub status: ExecutionStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub error_message: Option<&'a str>,
    pub next_run_at: Option<DateTime<Utc>>,
}

const JOB_COLUMNS: &str = "id, name, description, job_handler, enabled, interval_minutes,
     last_run_at, next_run_at, created_at, updated_at";

const EXECUTION_COLUMNS: &str =
    "id, scheduled_job_id, started_at, completed_at, duration_ms, status, error_message";

/// [`JobStore`] backed by a single SQLite connection behind a `Mutex`.
///
/// Each call holds the lock for its whole statement (or transaction), which
/// is what makes the conditional insert and the upsert atomic.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied statement.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobStore for SqliteJobStore {
    fn find_job_by_name(&self, name: &str) -> Result<Option<ScheduledJob>> {
        let conn = self.conn();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE name = ?1"),
                [name],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    #[instrument(skip(self, description), fields(job = %name))]
    fn upsert_job_definition(
        &self,
        name: &str,
        handler_id: &str,
        interval_minutes: i64,
        description: &str,
    ) -> Result<ScheduledJob> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let select = format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE name = ?1");
        let existing = tx.query_row(&select, [name], row_to_job).optional()?;
        let now = ts_to_sql(crate::db::now());

        match existing {
            None => {
                // New jobs are due immediately.
                tx.execute(
                    "INSERT INTO scheduled_jobs
                     (name, description, job_handler, enabled, interval_minutes,
                      last_run_at, next_run_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 1, ?4, NULL, ?5, ?5, ?5)",
                    params![name, description, handler_id, interval_minutes, now],
                )?;
                info!(handler = handler_id, interval_minutes, "scheduled job created");
            }
            Some(job) => {
                let mut sets: Vec<&str> = Vec::new();
                let mut values: Vec<Value> = Vec::new();
                if job.job_handler != handler_id {
                    sets.push("job_handler = ?");
                    values.push(Value::Text(handler_id.to_string()));
                }
                if job.interval_minutes != interval_minutes {
                    sets.push("interval_minutes = ?");
                    values.push(Value::Integer(interval_minutes));
                }
                if job.description != description {
                    sets.push("description = ?");
                    values.push(Value::Text(description.to_string()));
                }

                if sets.is_empty() {
                    debug!("scheduled job unchanged");
                } else {
                    sets.push("updated_at = ?");
                    values.push(Value::Text(now));
                    values.push(Value::Integer(job.id));
                    let sql = format!("UPDATE scheduled_jobs SET {} WHERE id = ?", sets.join(", "));
                    tx.execute(&sql, rusqlite::params_from_iter(values))?;
                    info!(
                        job_id = job.id,
                        old_handler = %job.job_handler,
                        handler = handler_id,
                        interval_minutes,
                        "scheduled job updated"
                    );
                }
            }
        }

        let job = tx.query_row(&select, [name], row_to_job)?;
        tx.commit()?;
        Ok(job)
    }

    fn find_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs
             WHERE enabled = 1 AND (next_run_at IS NULL OR next_run_at <= ?1)
             ORDER BY next_run_at"
        ))?;
        let jobs = stmt
            .query_map([ts_to_sql(now)], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn count_pending_executions(&self, job_id: i64) -> Result<i64> {
        let conn = self.conn();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM job_executions
             WHERE scheduled_job_id = ?1 AND status = 'pending'",
            [job_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    fn insert_execution(&self, job_id: i64, started_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO job_executions (scheduled_job_id, started_at, status)
             VALUES (?1, ?2, 'pending')",
            params![job_id, ts_to_sql(started_at)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn try_insert_pending_execution(
        &self,
        job_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let conn = self.conn();
        let id = conn
            .query_row(
                "INSERT INTO job_executions (scheduled_job_id, started_at, status)
                 SELECT ?1, ?2, 'pending'
                 WHERE NOT EXISTS (
                     SELECT 1 FROM job_executions
                     WHERE scheduled_job_id = ?1 AND status = 'pending'
                 )
                 AND EXISTS (
                     SELECT 1 FROM scheduled_jobs
                     WHERE id = ?1 AND enabled = 1
                       AND (next_run_at IS NULL OR next_run_at <= ?2)
                 )
                 RETURNING id",
                params![job_id, ts_to_sql(started_at)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn complete_execution(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        completed_at: DateTime<Utc>,
        duration_ms: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        ensure_terminal(status)?;
        let conn = self.conn();
        mark_completed(
            &conn,
            execution_id,
            status,
            completed_at,
            duration_ms,
            error_message,
        )
    }

    fn update_job_schedule(
        &self,
        job_id: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn();
        reschedule(&conn, job_id, last_run_at, next_run_at)
    }

    fn finish_execution(&self, finished: &FinishedExecution<'_>) -> Result<()> {
        ensure_terminal(finished.status)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        mark_completed(
            &tx,
            finished.execution_id,
            finished.status,
            finished.completed_at,
            finished.duration_ms,
            finished.error_message,
        )?;
        match finished.next_run_at {
            Some(next_run_at) => {
                reschedule(&tx, finished.job_id, finished.completed_at, next_run_at)?
            }
            None => {
                let last = ts_to_sql(finished.completed_at);
                tx.execute(
                    "UPDATE scheduled_jobs
                     SET last_run_at = ?1, enabled = 0, updated_at = ?1
                     WHERE id = ?2",
                    params![last, finished.job_id],
                )?;
                warn!(job_id = finished.job_id, "next run is not schedulable; job disabled");
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn fail_orphaned_executions(&self, now: DateTime<Utc>, message: &str) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let orphans: Vec<(i64, DateTime<Utc>)> = {
            let mut stmt =
                tx.prepare("SELECT id, started_at FROM job_executions WHERE status = 'pending'")?;
            let rows = stmt
                .query_map([], |row| {
                    let raw: String = row.get(1)?;
                    Ok((row.get(0)?, ts_from_sql(1, &raw)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let completed = ts_to_sql(now);
        for (id, started_at) in &orphans {
            let duration_ms = (now - *started_at).num_milliseconds().max(0);
            tx.execute(
                "UPDATE job_executions
                 SET status = 'failed', completed_at = ?1, duration_ms = ?2, error_message = ?3
                 WHERE id = ?4",
                params![completed, duration_ms, message, id],
            )?;
        }
        tx.commit()?;
        Ok(orphans.len())
    }

    fn set_job_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE scheduled_jobs SET enabled = ?1, updated_at = ?2 WHERE name = ?3",
            params![enabled, ts_to_sql(crate::db::now()), name],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound {
                name: name.to_string(),
            });
        }
        info!(job = name, enabled, "scheduled job toggled");
        Ok(())
    }

    fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs ORDER BY name"
        ))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn list_executions(&self, job_id: Option<i64>, limit: usize) -> Result<Vec<JobExecution>> {
        let conn = self.conn();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        // ?1 IS NULL selects every job.
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions
             WHERE ?1 IS NULL OR scheduled_job_id = ?1
             ORDER BY started_at DESC, id DESC
             LIMIT ?2"
        ))?;
        let executions = stmt
            .query_map(params![job_id, limit], row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(executions)
    }

    fn prune_executions(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        let n = conn.execute(
            "DELETE FROM job_executions
             WHERE status != 'pending' AND completed_at < ?1",
            [ts_to_sql(older_than)],
        )?;
        if n > 0 {
            debug!(deleted = n, "pruned job executions");
        }
        Ok(n)
    }
}

fn ensure_terminal(status: ExecutionStatus) -> Result<()> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(SchedulerError::InvalidArgument(
            "an execution can only be completed with a terminal status".to_string(),
        ))
    }
}

fn mark_completed(
    conn: &Connection,
    execution_id: i64,
    status: ExecutionStatus,
    completed_at: DateTime<Utc>,
    duration_ms: i64,
    error_message: Option<&str>,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE job_executions
         SET status = ?1, completed_at = ?2, duration_ms = ?3, error_message = ?4
         WHERE id = ?5 AND status = 'pending'",
        params![
            status.as_str(),
            ts_to_sql(completed_at),
            duration_ms,
            error_message,
            execution_id
        ],
    )?;
    if n == 0 {
        warn!(execution_id, %status, "execution was not pending; result discarded");
    }
    Ok(())
}

fn reschedule(
    conn: &Connection,
    job_id: i64,
    last_run_at: DateTime<Utc>,
    next_run_at: DateTime<Utc>,
) -> Result<()> {
    let last = ts_to_sql(last_run_at);
    conn.execute(
        "UPDATE scheduled_jobs
         SET last_run_at = ?1, next_run_at = ?2, updated_at = ?1
         WHERE id = ?3",
        params![last, ts_to_sql(next_run_at), job_id],
    )?;
    Ok(())
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<ScheduledJob> {
    Ok(ScheduledJob {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        job_handler: row.get(3)?,
        enabled: row.get(4)?,
        interval_minutes: row.get(5)?,
        last_run_at: opt_ts_from_sql(6, row.get(6)?)?,
        next_run_at: opt_ts_from_sql(7, row.get(7)?)?,
        created_at: ts_from_sql(8, &row.get::<_, String>(8)?)?,
        updated_at: ts_from_sql(9, &row.get::<_, String>(9)?)?,
    })
}

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<JobExecution> {
    let status: String = row.get(5)?;
    let status = status.parse::<ExecutionStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(JobExecution {
        id: row.get(0)?,
        scheduled_job_id: row.get(1)?,
        started_at: ts_from_sql(2, &row.get::<_, String>(2)?)?,
        completed_at: opt_ts_from_sql(3, row.get(3)?)?,
        duration_ms: row.get(4)?,
        status,
        error_message: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now;

    fn store() -> SqliteJobStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        SqliteJobStore::new(conn).unwrap()
    }

    fn job_count(store: &SqliteJobStore) -> i64 {
        store
            .conn()
            .query_row("SELECT COUNT(*) FROM scheduled_jobs", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn upsert_creates_enabled_job_due_now() {
        let s = store();
        let before = now();
        let job = s.upsert_job_definition("cleanup", "h1", 5, "prune").unwrap();
        assert_eq!(job.name, "cleanup");
        assert_eq!(job.job_handler, "h1");
        assert!(job.enabled);
        assert_eq!(job.last_run_at, None);
        assert!(job.next_run_at.unwrap() >= before);
        assert_eq!(s.find_due_jobs(now()).unwrap(), vec![job]);
    }

    #[test]
    fn upsert_same_config_is_noop() {
        let s = store();
        let first = s.upsert_job_definition("cleanup", "h1", 5, "prune").unwrap();
        let second = s.upsert_job_definition("cleanup", "h1", 5, "prune").unwrap();
        assert_eq!(first, second);
        assert_eq!(job_count(&s), 1);
    }

    #[test]
    fn upsert_updates_changed_fields_in_place() {
        let s = store();
        let first = s.upsert_job_definition("cleanup", "h1", 5, "prune").unwrap();
        let second = s.upsert_job_definition("cleanup", "h2", 10, "prune more").unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.job_handler, "h2");
        assert_eq!(second.interval_minutes, 10);
        assert_eq!(second.description, "prune more");
        // Schedule state is not reset by re-registration.
        assert_eq!(second.next_run_at, first.next_run_at);
        assert_eq!(job_count(&s), 1);
    }

    #[test]
    fn due_scan_respects_enabled_and_next_run() {
        let s = store();
        let due = s.upsert_job_definition("due", "h", 1, "").unwrap();
        let later = s.upsert_job_definition("later", "h", 1, "").unwrap();
        s.upsert_job_definition("off", "h", 1, "").unwrap();
        s.set_job_enabled("off", false).unwrap();
        let t = now();
        s.update_job_schedule(later.id, t, t + chrono::Duration::minutes(1)).unwrap();

        let found = s.find_due_jobs(now()).unwrap();
        let names: Vec<_> = found.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["due"]);
        assert_eq!(found[0].id, due.id);
    }

    #[test]
    fn null_next_run_is_due() {
        let s = store();
        let job = s.upsert_job_definition("fresh", "h", 1, "").unwrap();
        s.conn()
            .execute("UPDATE scheduled_jobs SET next_run_at = NULL WHERE id = ?1", [job.id])
            .unwrap();
        assert_eq!(s.find_due_jobs(now()).unwrap().len(), 1);
    }

    #[test]
    fn conditional_insert_allows_one_pending() {
        let s = store();
        let job = s.upsert_job_definition("cleanup", "h", 1, "").unwrap();
        let first = s.try_insert_pending_execution(job.id, now()).unwrap();
        assert!(first.is_some());
        assert_eq!(s.try_insert_pending_execution(job.id, now()).unwrap(), None);
        assert_eq!(s.count_pending_executions(job.id).unwrap(), 1);

        s.complete_execution(first.unwrap(), ExecutionStatus::Success, now(), 3, None)
            .unwrap();
        assert_eq!(s.count_pending_executions(job.id).unwrap(), 0);
        assert!(s.try_insert_pending_execution(job.id, now()).unwrap().is_some());
    }

    #[test]
    fn conditional_insert_requires_job_to_be_due() {
        let s = store();
        let job = s.upsert_job_definition("cleanup", "h", 60, "").unwrap();
        let t = now();
        s.update_job_schedule(job.id, t, t + chrono::Duration::minutes(60))
            .unwrap();
        assert_eq!(s.try_insert_pending_execution(job.id, now()).unwrap(), None);
        // Due again once the clock reaches next_run_at.
        let later = t + chrono::Duration::minutes(60);
        assert!(s.try_insert_pending_execution(job.id, later).unwrap().is_some());
    }

    #[test]
    fn conditional_insert_skips_disabled_job() {
        let s = store();
        let job = s.upsert_job_definition("cleanup", "h", 1, "").unwrap();
        s.set_job_enabled("cleanup", false).unwrap();
        assert_eq!(s.try_insert_pending_execution(job.id, now()).unwrap(), None);
        assert!(s.list_executions(Some(job.id), 10).unwrap().is_empty());
    }

    #[test]
    fn finish_records_result_and_schedule_together() {
        let s = store();
        let job = s.upsert_job_definition("cleanup", "h", 60, "").unwrap();
        let id = s.try_insert_pending_execution(job.id, now()).unwrap().unwrap();
        let done = now();
        let next = done + chrono::Duration::minutes(60);
        s.finish_execution(&FinishedExecution {
            execution_id: id,
            job_id: job.id,
            status: ExecutionStatus::Success,
            completed_at: done,
            duration_ms: 7,
            error_message: None,
            next_run_at: Some(next),
        })
        .unwrap();

        let exec = &s.list_executions(Some(job.id), 1).unwrap()[0];
        assert_eq!(exec.status, ExecutionStatus::Success);
        assert_eq!(exec.completed_at, Some(done));
        let job = s.find_job_by_name("cleanup").unwrap().unwrap();
        assert_eq!(job.last_run_at, Some(done));
        assert_eq!(job.next_run_at, Some(next));
        assert!(s.find_due_jobs(now()).unwrap().is_empty());
    }

    #[test]
    fn finish_without_next_run_disables_job() {
        let s = store();
        let job = s.upsert_job_definition("big", "h", 1, "").unwrap();
        let id = s.insert_execution(job.id, now()).unwrap();
        let done = now();
        s.finish_execution(&FinishedExecution {
            execution_id: id,
            job_id: job.id,
            status: ExecutionStatus::Success,
            completed_at: done,
            duration_ms: 1,
            error_message: None,
            next_run_at: None,
        })
        .unwrap();

        let job = s.find_job_by_name("big").unwrap().unwrap();
        assert!(!job.enabled);
        assert_eq!(job.last_run_at, Some(done));
        assert_eq!(s.count_pending_executions(job.id).unwrap(), 0);
        assert!(s.find_due_jobs(now()).unwrap().is_empty());
    }

    #[test]
    fn finish_rejects_pending_status() {
        let s = store();
        let job = s.upsert_job_definition("x", "h", 1, "").unwrap();
        let id = s.insert_execution(job.id, now()).unwrap();
        let next = now() + chrono::Duration::minutes(1);
        let err = s
            .finish_execution(&FinishedExecution {
                execution_id: id,
                job_id: job.id,
                status: ExecutionStatus::Pending,
                completed_at: now(),
                duration_ms: 0,
                error_message: None,
                next_run_at: Some(next),
            })
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument(_)));
        // Nothing was written.
        let job = s.find_job_by_name("x").unwrap().unwrap();
        assert_eq!(job.last_run_at, None);
    }

    #[test]
    fn complete_is_applied_once() {
        let s = store();
        let job = s.upsert_job_definition("flaky", "h", 1, "").unwrap();
        let id = s.insert_execution(job.id, now()).unwrap();
        s.complete_execution(id, ExecutionStatus::Failed, now(), 12, Some("boom"))
            .unwrap();
        s.complete_execution(id, ExecutionStatus::Success, now(), 99, None)
            .unwrap();

        let execs = s.list_executions(Some(job.id), 10).unwrap();
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].status, ExecutionStatus::Failed);
        assert_eq!(execs[0].error_message.as_deref(), Some("boom"));
        assert_eq!(execs[0].duration_ms, Some(12));
        assert!(execs[0].completed_at.is_some());
    }

    #[test]
    fn complete_rejects_pending_status() {
        let s = store();
        let job = s.upsert_job_definition("x", "h", 1, "").unwrap();
        let id = s.insert_execution(job.id, now()).unwrap();
        let err = s
            .complete_execution(id, ExecutionStatus::Pending, now(), 0, None)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument(_)));
    }

    #[test]
    fn orphaned_pending_rows_are_failed() {
        let s = store();
        let job = s.upsert_job_definition("x", "h", 1, "").unwrap();
        let started = now() - chrono::Duration::seconds(5);
        s.insert_execution(job.id, started).unwrap();

        let n = s.fail_orphaned_executions(now(), "interrupted").unwrap();
        assert_eq!(n, 1);
        assert_eq!(s.count_pending_executions(job.id).unwrap(), 0);
        let exec = &s.list_executions(Some(job.id), 1).unwrap()[0];
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.error_message.as_deref(), Some("interrupted"));
        assert!(exec.duration_ms.unwrap() >= 5_000);
        assert_eq!(s.fail_orphaned_executions(now(), "interrupted").unwrap(), 0);
    }

    #[test]
    fn set_enabled_unknown_job_is_not_found() {
        let s = store();
        let err = s.set_job_enabled("ghost", true).unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotFound { .. }));
    }

    #[test]
    fn prune_keeps_pending_and_recent() {
        let s = store();
        let job = s.upsert_job_definition("x", "h", 1, "").unwrap();
        let old = now() - chrono::Duration::days(40);
        let old_id = s.insert_execution(job.id, old).unwrap();
        s.complete_execution(old_id, ExecutionStatus::Success, old, 1, None)
            .unwrap();
        let recent_id = s.insert_execution(job.id, now()).unwrap();
        s.complete_execution(recent_id, ExecutionStatus::Success, now(), 1, None)
            .unwrap();
        s.insert_execution(job.id, old).unwrap();

        let n = s.prune_executions(now() - chrono::Duration::days(30)).unwrap();
        assert_eq!(n, 1);
        assert_eq!(s.list_executions(Some(job.id), 10).unwrap().len(), 2);
    }

    #[test]
    fn executions_cascade_with_job() {
        let s = store();
        let job = s.upsert_job_definition("x", "h", 1, "").unwrap();
        s.insert_execution(job.id, now()).unwrap();
        s.conn()
            .execute("DELETE FROM scheduled_jobs WHERE id = ?1", [job.id])
            .unwrap();
        assert!(s.list_executions(None, 10).unwrap().is_empty());
    }

    #[test]
    fn list_executions_newest_first_with_limit() {
        let s = store();
        let a = s.upsert_job_definition("a", "h", 1, "").unwrap();
        let b = s.upsert_job_definition("b", "h", 1, "").unwrap();
        let t = now();
        s.insert_execution(a.id, t - chrono::Duration::seconds(2)).unwrap();
        let newest = s.insert_execution(b.id, t).unwrap();
        s.insert_execution(a.id, t - chrono::Duration::seconds(1)).unwrap();

        let all = s.list_executions(None, 2).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, newest);
        assert_eq!(s.list_executions(Some(a.id), 10).unwrap().len(), 2);
    }
}
