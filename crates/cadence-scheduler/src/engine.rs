use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cadence_core::config::{
    SchedulerConfig, DEFAULT_JOB_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_SHUTDOWN_GRACE_SECS,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{
    db,
    error::{Result, SchedulerError},
    executor,
    registry::{handler_fn, JobContext, JobHandler, JobRegistry},
    store::JobStore,
    types::{JobConfig, ScheduledJob},
};

/// Recorded on executions that were still pending when the scheduler started.
pub const ORPHANED_EXECUTION_MESSAGE: &str = "execution interrupted by scheduler restart";

/// Runtime tuning for a [`Scheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Period of the dispatch loop. Zero falls back to one minute.
    pub poll_interval: Duration,
    /// After this long an execution is recorded as `timeout`. Zero falls back to five minutes.
    pub job_timeout: Duration,
    /// Upper bound on how long `stop()` waits for in-flight executions.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
            job_timeout: Duration::from_secs(cfg.job_timeout_secs),
            shutdown_grace: Duration::from_secs(cfg.shutdown_grace_secs),
        }
        .normalized()
    }
}

impl SchedulerSettings {
    fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.poll_interval.is_zero() {
            self.poll_interval = defaults.poll_interval;
        }
        if self.job_timeout.is_zero() {
            self.job_timeout = defaults.job_timeout;
        }
        self
    }
}

/// Lifecycle of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    Stopping,
}

/// State shared between the scheduler handle, the dispatch loop and every
/// execution task.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) registry: JobRegistry,
    pub(crate) settings: SchedulerSettings,
    /// Wait-group over in-flight executions.
    tracker: TaskTracker,
}

struct Lifecycle {
    state: SchedulerState,
    cancel: Option<CancellationToken>,
    dispatch_loop: Option<JoinHandle<()>>,
}

/// Persistent periodic job scheduler.
///
/// Owns its registry, its store handle and its dispatch loop; several
/// schedulers can coexist in one process. Dropping a running scheduler
/// cancels its dispatch loop but does not wait for in-flight executions.
pub struct Scheduler {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl Scheduler {
    /// Scheduler polling every `poll_interval` with default timeout and grace period.
    pub fn new(store: Arc<dyn JobStore>, poll_interval: Duration) -> Self {
        Self::with_settings(
            store,
            SchedulerSettings {
                poll_interval,
                ..SchedulerSettings::default()
            },
        )
    }

    pub fn with_settings(store: Arc<dyn JobStore>, settings: SchedulerSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                registry: JobRegistry::new(),
                settings: settings.normalized(),
                tracker: TaskTracker::new(),
            }),
            lifecycle: Mutex::new(Lifecycle {
                state: SchedulerState::Stopped,
                cancel: None,
                dispatch_loop: None,
            }),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.shared.settings
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.shared.store
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.shared.registry
    }

    pub fn state(&self) -> SchedulerState {
        self.lifecycle().state
    }

    /// Number of executions currently tracked (running or awaiting bookkeeping).
    pub fn in_flight(&self) -> usize {
        self.shared.tracker.len()
    }

    /// Persist the job definition, then bind `handler_id` to `handler`.
    ///
    /// Database first: if the store write fails nothing is registered in
    /// memory, and a crash between the two steps is repaired by registering
    /// again on restart (the upsert is idempotent).
    pub fn register_job_with_schedule<F, Fut>(
        &self,
        handler_id: &str,
        handler: F,
        config: JobConfig,
    ) -> Result<ScheduledJob>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_handler(handler_id, handler_fn(handler), config)
    }

    /// Same as [`Self::register_job_with_schedule`] for an already boxed handler.
    pub fn register_handler(
        &self,
        handler_id: &str,
        handler: JobHandler,
        config: JobConfig,
    ) -> Result<ScheduledJob> {
        if handler_id.trim().is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "handler id must not be empty".to_string(),
            ));
        }
        config.validate()?;

        let job = self.shared.store.upsert_job_definition(
            &config.name,
            handler_id,
            config.interval_minutes,
            &config.description,
        )?;
        // The write lock is taken only here, after the store round-trip.
        self.shared.registry.insert(handler_id, handler);

        info!(
            job = %job.name,
            job_id = job.id,
            handler = handler_id,
            interval_minutes = job.interval_minutes,
            "job registered"
        );
        Ok(job)
    }

    /// Spawn the dispatch loop. Must be called from within a Tokio runtime.
    ///
    /// Executions left `pending` by a previous process are failed first, then
    /// the loop runs one dispatch pass immediately and one per poll interval.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != SchedulerState::Stopped {
            return Err(SchedulerError::AlreadyRunning);
        }

        // Executions of an earlier run of this same instance may still be
        // finishing; their rows are not orphans.
        if self.shared.tracker.is_empty() {
            self.recover_orphaned_executions();
        }

        self.shared.tracker.reopen();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(dispatch_loop(Arc::clone(&self.shared), cancel.clone()));

        lifecycle.state = SchedulerState::Running;
        lifecycle.cancel = Some(cancel);
        lifecycle.dispatch_loop = Some(handle);
        info!(
            poll_interval_ms = self.shared.settings.poll_interval.as_millis() as u64,
            job_timeout_ms = self.shared.settings.job_timeout.as_millis() as u64,
            "scheduler started"
        );
        Ok(())
    }

    /// Stop admitting new work and wait, up to the grace period, for
    /// in-flight executions. Running handlers are never cancelled.
    ///
    /// Safe to call when the scheduler was never started.
    pub async fn stop(&self) {
        let (cancel, dispatch_loop) = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state != SchedulerState::Running {
                debug!(state = ?lifecycle.state, "stop requested while not running");
                return;
            }
            lifecycle.state = SchedulerState::Stopping;
            (lifecycle.cancel.take(), lifecycle.dispatch_loop.take())
        };

        info!("scheduler stopping");
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(handle) = dispatch_loop {
            if let Err(e) = handle.await {
                error!("dispatch loop ended abnormally: {e}");
            }
        }

        self.shared.tracker.close();
        let grace = self.shared.settings.shutdown_grace;
        match tokio::time::timeout(grace, self.shared.tracker.wait()).await {
            Ok(()) => info!("scheduler stopped; all executions finished"),
            Err(_elapsed) => warn!(
                in_flight = self.shared.tracker.len(),
                grace_ms = grace.as_millis() as u64,
                "shutdown grace period elapsed; executions may still be in flight"
            ),
        }

        self.lifecycle().state = SchedulerState::Stopped;
    }

    /// Run one dispatch pass now and return how many executions were launched.
    ///
    /// The dispatch loop calls this on every tick; it is public so embedders
    /// can trigger a pass without waiting for the next tick.
    pub fn dispatch_pass(&self) -> usize {
        self.shared.dispatch_pass()
    }

    fn recover_orphaned_executions(&self) {
        match self
            .shared
            .store
            .fail_orphaned_executions(db::now(), ORPHANED_EXECUTION_MESSAGE)
        {
            Ok(0) => {}
            Ok(n) => warn!(count = n, "pending executions from a previous run marked failed"),
            Err(e) => error!("orphaned execution recovery failed: {e}"),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
        }
    }
}

impl Shared {
    /// One scan of the store for due jobs plus launching their executions.
    ///
    /// Store errors abandon the pass; the next tick retries.
    pub(crate) fn dispatch_pass(self: &Arc<Self>) -> usize {
        let due = match self.store.find_due_jobs(db::now()) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("due-job scan failed, skipping this pass: {e}");
                return 0;
            }
        };

        let mut launched = 0;
        for job in due {
            // Overlap guard. Not atomic with the insert below; the executor's
            // conditional insert closes that gap.
            match self.store.count_pending_executions(job.id) {
                Ok(0) => {}
                Ok(pending) => {
                    debug!(
                        job = %job.name,
                        job_id = job.id,
                        pending,
                        "previous execution still pending, skipping"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        job = %job.name,
                        job_id = job.id,
                        "pending-execution check failed, skipping: {e}"
                    );
                    continue;
                }
            }

            debug!(job = %job.name, job_id = job.id, handler = %job.job_handler, "dispatching job");
            self.tracker.spawn(executor::execute(Arc::clone(self), job));
            launched += 1;
        }
        launched
    }
}

async fn dispatch_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    // The first tick completes immediately, so overdue jobs run right after
    // a restart instead of one full interval later.
    let mut ticker = tokio::time::interval(shared.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("dispatch loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                let launched = shared.dispatch_pass();
                if launched > 0 {
                    debug!(launched, "dispatch pass complete");
                }
            }
        }
    }
}
