//! Built-in housekeeping jobs.
//!
//! The execution history grows by one row per run; this job keeps it bounded.

use std::sync::Arc;

use cadence_core::config::MaintenanceConfig;
use cadence_scheduler::{db, JobConfig, JobStore, Scheduler, ScheduledJob};
use tracing::info;

pub const HISTORY_PRUNING_JOB: &str = "execution-history-pruning";
pub const HISTORY_PRUNING_HANDLER: &str = "prune_execution_history";

/// Delete terminal executions older than the retention window.
pub fn prune_execution_history(store: &dyn JobStore, retention_days: u32) -> anyhow::Result<usize> {
    let cutoff = db::now() - chrono::Duration::days(i64::from(retention_days));
    let deleted = store.prune_executions(cutoff)?;
    if deleted > 0 {
        info!(deleted, retention_days, "pruned execution history");
    }
    Ok(deleted)
}

/// Register every built-in job enabled in `cfg`.
pub fn register_builtin_jobs(
    scheduler: &Scheduler,
    cfg: &MaintenanceConfig,
) -> anyhow::Result<Option<ScheduledJob>> {
    if !cfg.enabled {
        info!("built-in maintenance jobs disabled");
        return Ok(None);
    }

    let store = Arc::clone(scheduler.store());
    let retention_days = cfg.history_retention_days;
    let job = scheduler.register_job_with_schedule(
        HISTORY_PRUNING_HANDLER,
        move |_ctx| {
            let store = Arc::clone(&store);
            async move {
                prune_execution_history(store.as_ref(), retention_days)?;
                Ok(())
            }
        },
        JobConfig::new(
            HISTORY_PRUNING_JOB,
            format!("Delete finished job executions older than {retention_days} days"),
            i64::from(cfg.history_prune_interval_minutes),
        ),
    )?;
    Ok(Some(job))
}
