use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db;
use crate::engine::Shared;
use crate::registry::JobContext;
use crate::store::FinishedExecution;
use crate::types::{ExecutionStatus, ScheduledJob};

struct Outcome {
    status: ExecutionStatus,
    error_message: Option<String>,
}

impl Outcome {
    fn success() -> Self {
        Self {
            status: ExecutionStatus::Success,
            error_message: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            error_message: Some(message),
        }
    }

    fn timeout(message: String) -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            error_message: Some(message),
        }
    }
}

/// Run one attempt of `job`, a snapshot taken at dispatch time.
///
/// Every failure past the initial insert ends up on the execution row; nothing
/// is propagated to the dispatch loop.
pub(crate) async fn execute(shared: Arc<Shared>, job: ScheduledJob) {
    let started_at = db::now();
    let execution_id = match shared
        .store
        .try_insert_pending_execution(job.id, started_at)
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            debug!(
                job = %job.name,
                job_id = job.id,
                "job no longer due or already pending, run skipped"
            );
            return;
        }
        Err(e) => {
            // The schedule is untouched, so the job stays due for the next pass.
            error!(job = %job.name, job_id = job.id, "could not record execution start: {e}");
            return;
        }
    };

    let outcome = run_handler(&shared, &job, execution_id).await;

    let completed_at = db::now();
    let duration_ms = (completed_at - started_at).num_milliseconds();
    match outcome.status {
        ExecutionStatus::Success => {
            info!(job = %job.name, execution_id, duration_ms, "job succeeded")
        }
        ExecutionStatus::Timeout => warn!(
            job = %job.name,
            execution_id,
            duration_ms,
            "job timed out; handler left running in the background"
        ),
        _ => warn!(
            job = %job.name,
            execution_id,
            duration_ms,
            error = outcome.error_message.as_deref().unwrap_or_default(),
            "job failed"
        ),
    }

    // Advanced after every attempt, whatever the outcome.
    let next_run_at = job.next_run_after(completed_at);
    if next_run_at.is_none() {
        error!(
            job = %job.name,
            interval_minutes = job.interval_minutes,
            "next run is out of range; disabling job"
        );
    }
    let finished = FinishedExecution {
        execution_id,
        job_id: job.id,
        status: outcome.status,
        completed_at,
        duration_ms,
        error_message: outcome.error_message.as_deref(),
        next_run_at,
    };
    if let Err(e) = shared.store.finish_execution(&finished) {
        error!(job = %job.name, execution_id, "could not record execution result: {e}");
    }
}

async fn run_handler(shared: &Shared, job: &ScheduledJob, execution_id: i64) -> Outcome {
    let Some(handler) = shared.registry.get(&job.job_handler) else {
        // The durable row names a handler this process never registered.
        error!(job = %job.name, handler = %job.job_handler, "job handler not registered");
        return Outcome::failed(format!("handler not found: {}", job.job_handler));
    };

    let token = CancellationToken::new();
    let ctx = JobContext {
        job_name: job.name.clone(),
        execution_id,
        cancellation_token: token.clone(),
    };

    // The handler runs on its own task and reports through a oneshot, so a
    // handler that ignores its deadline cannot stall the timeout below.
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(handler(ctx).await);
    });

    let timeout = shared.settings.job_timeout;
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(Ok(()))) => Outcome::success(),

        Ok(Ok(Err(e))) => Outcome::failed(e.to_string()),

        // The sender was dropped without a result: the handler task panicked.
        Ok(Err(_recv_err)) => Outcome::failed("handler panicked".to_string()),

        // Bookkeeping only. The task is not aborted; the token is a request.
        Err(_elapsed) => {
            token.cancel();
            Outcome::timeout(format!(
                "execution exceeded timeout of {}ms",
                timeout.as_millis()
            ))
        }
    }
}
