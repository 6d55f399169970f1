use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates `scheduled_jobs` and `job_executions` (idempotent). The index on
/// `next_run_at` keeps the due-job scan cheap; the `(scheduled_job_id, status)`
/// index serves the pending-execution check on every dispatch.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            name             TEXT    NOT NULL UNIQUE,
            description      TEXT    NOT NULL DEFAULT '',
            job_handler      TEXT    NOT NULL,
            enabled          INTEGER NOT NULL DEFAULT 1,
            interval_minutes INTEGER NOT NULL CHECK (interval_minutes > 0),
            last_run_at      TEXT,              -- RFC 3339 millis, UTC
            next_run_at      TEXT,              -- NULL means due now
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_next_run
            ON scheduled_jobs (next_run_at);

        CREATE TABLE IF NOT EXISTS job_executions (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            scheduled_job_id INTEGER NOT NULL
                REFERENCES scheduled_jobs (id) ON DELETE CASCADE,
            started_at       TEXT    NOT NULL,
            completed_at     TEXT,
            duration_ms      INTEGER,
            status           TEXT    NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'success', 'failed', 'timeout')),
            error_message    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_job_executions_job_status
            ON job_executions (scheduled_job_id, status);
        CREATE INDEX IF NOT EXISTS idx_job_executions_completed
            ON job_executions (completed_at);
        ",
    )?;
    Ok(())
}

/// Current time truncated to the precision we persist, so a value written
/// and read back compares equal to the one computed in memory.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Fixed-width text form: lexicographic order equals chronological order.
pub(crate) fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn ts_from_sql(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn opt_ts_from_sql(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(|s| ts_from_sql(idx, s)).transpose()
}
