use chrono::{DateTime, Datelike, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::{Result, SchedulerError};

/// Timestamps are stored as fixed-width RFC 3339 text; a five-digit year
/// would break the lexicographic ordering the due-job scan relies on.
const LAST_STORABLE_YEAR: i32 = 9999;

/// `ts` plus `interval_minutes`, or `None` when the result cannot be
/// represented or stored.
fn add_interval(ts: DateTime<Utc>, interval_minutes: i64) -> Option<DateTime<Utc>> {
    let interval = TimeDelta::try_minutes(interval_minutes)?;
    ts.checked_add_signed(interval)
        .filter(|next| next.year() <= LAST_STORABLE_YEAR)
}

/// Registration-time description of a recurring job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Stable, globally unique job name. Distinct from the handler id.
    pub name: String,
    pub description: String,
    pub interval_minutes: i64,
}

impl JobConfig {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        interval_minutes: i64,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            interval_minutes,
        }
    }

    /// Pure check, never touches the store or the registry.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "job name must not be empty".to_string(),
            ));
        }
        if self.interval_minutes <= 0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "interval_minutes must be positive, got {}",
                self.interval_minutes
            )));
        }
        if add_interval(db::now(), self.interval_minutes).is_none() {
            return Err(SchedulerError::InvalidConfig(format!(
                "interval_minutes {} is too large to schedule",
                self.interval_minutes
            )));
        }
        Ok(())
    }
}

/// A durable, named recurring task definition (`scheduled_jobs` row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Key into the in-memory job registry.
    pub job_handler: String,
    pub enabled: bool,
    pub interval_minutes: i64,
    pub last_run_at: Option<DateTime<Utc>>,
    /// Indexed; NULL or past means due.
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// Next run for an attempt that finished at `ran_at`. Missed intervals are
    /// never backfilled: the cadence restarts from the latest attempt.
    ///
    /// `None` when the interval pushes the next run past the last storable
    /// timestamp. Registration rejects such intervals, so this only happens
    /// for rows edited outside the scheduler.
    pub fn next_run_after(&self, ran_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        add_interval(ran_at, self.interval_minutes)
    }
}

/// Outcome of one run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Row inserted, handler not yet finished.
    Pending,
    Success,
    /// Handler returned an error or panicked, or was not registered.
    Failed,
    /// Handler did not finish within the configured timeout.
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "timeout" => Ok(ExecutionStatus::Timeout),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// A durable record of one run attempt (`job_executions` row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: i64,
    pub scheduled_job_id: i64,
    pub started_at: DateTime<Utc>,
    /// Set together with `duration_ms`, exactly once.
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
}
