//! Plain-text views over the job store for the inspection subcommands.

use std::collections::HashMap;

use cadence_scheduler::{JobExecution, JobStore, ScheduledJob, SchedulerError};
use chrono::{DateTime, SecondsFormat, Utc};

pub fn print_jobs(store: &dyn JobStore) -> anyhow::Result<()> {
    let jobs = store.list_jobs()?;
    if jobs.is_empty() {
        println!("no scheduled jobs");
        return Ok(());
    }
    for job in &jobs {
        println!("{}", format_job(job));
    }
    Ok(())
}

pub fn print_history(store: &dyn JobStore, job: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let job_id = match job {
        Some(name) => Some(
            store
                .find_job_by_name(name)?
                .ok_or_else(|| SchedulerError::JobNotFound {
                    name: name.to_string(),
                })?
                .id,
        ),
        None => None,
    };

    let names: HashMap<i64, String> = store
        .list_jobs()?
        .into_iter()
        .map(|j| (j.id, j.name))
        .collect();

    let executions = store.list_executions(job_id, limit)?;
    if executions.is_empty() {
        println!("no executions recorded");
        return Ok(());
    }
    for exec in &executions {
        let name = names
            .get(&exec.scheduled_job_id)
            .map(String::as_str)
            .unwrap_or("?");
        println!("{}", format_execution(name, exec));
    }
    Ok(())
}

fn fmt_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}

pub(crate) fn format_job(job: &ScheduledJob) -> String {
    format!(
        "{:<32} {:<8} every {:>5}m  handler={:<28} last={:<20} next={}",
        job.name,
        if job.enabled { "enabled" } else { "disabled" },
        job.interval_minutes,
        job.job_handler,
        fmt_ts(job.last_run_at),
        fmt_ts(job.next_run_at),
    )
}

pub(crate) fn format_execution(job_name: &str, exec: &JobExecution) -> String {
    let duration = exec
        .duration_ms
        .map(|ms| format!("{ms}ms"))
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "#{:<6} {:<32} {:<8} started={} duration={}",
        exec.id,
        job_name,
        exec.status,
        fmt_ts(Some(exec.started_at)),
        duration,
    );
    if let Some(ref msg) = exec.error_message {
        line.push_str(&format!(" error={msg:?}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_scheduler::ExecutionStatus;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn job_line_shows_schedule() {
        let job = ScheduledJob {
            id: 1,
            name: "cleanup".into(),
            description: String::new(),
            job_handler: "prune".into(),
            enabled: false,
            interval_minutes: 15,
            last_run_at: None,
            next_run_at: Some(at(4)),
            created_at: at(1),
            updated_at: at(1),
        };
        let line = format_job(&job);
        assert!(line.starts_with("cleanup"));
        assert!(line.contains("disabled"));
        assert!(line.contains("every    15m"));
        assert!(line.contains("last=-"));
        assert!(line.contains("next=2026-03-01T04:00:00Z"));
    }

    #[test]
    fn execution_line_includes_error() {
        let exec = JobExecution {
            id: 9,
            scheduled_job_id: 1,
            started_at: at(2),
            completed_at: Some(at(2)),
            duration_ms: Some(42),
            status: ExecutionStatus::Failed,
            error_message: Some("boom".into()),
        };
        let line = format_execution("flaky", &exec);
        assert!(line.contains("failed"));
        assert!(line.contains("duration=42ms"));
        assert!(line.ends_with("error=\"boom\""));
    }

    #[test]
    fn pending_execution_has_no_duration() {
        let exec = JobExecution {
            id: 1,
            scheduled_job_id: 1,
            started_at: at(3),
            completed_at: None,
            duration_ms: None,
            status: ExecutionStatus::Pending,
            error_message: None,
        };
        let line = format_execution("slow", &exec);
        assert!(line.contains("pending"));
        assert!(line.contains("duration=-"));
    }
}
