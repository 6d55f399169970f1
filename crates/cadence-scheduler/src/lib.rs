//! `cadence-scheduler` — persistent periodic job scheduler on Tokio + SQLite.
//!
//! # Overview
//!
//! Job definitions live in the `scheduled_jobs` table and every run attempt
//! is recorded in `job_executions`. A [`Scheduler`] owns an in-memory
//! [`registry::JobRegistry`] mapping handler ids to async functions, polls the
//! [`store::JobStore`] for due jobs and runs each one in its own task under a
//! timeout.
//!
//! # Guarantees
//!
//! | Property            | Mechanism                                                  |
//! |---------------------|------------------------------------------------------------|
//! | No self-overlap     | pending-execution check plus a conditional insert          |
//! | Restart recovery    | schedule state is persisted; orphaned runs are failed      |
//! | No backfill         | `next_run_at = last_run_at + interval` after every attempt |
//! | Bounded bookkeeping | runs past the timeout are recorded as `timeout`            |
//!
//! A timeout is a status label, not a kill signal: the handler keeps running
//! and is only asked to stop through [`registry::JobContext::cancellation_token`].

pub mod db;
pub mod engine;
pub mod error;
mod executor;
pub mod registry;
pub mod store;
pub mod types;

pub use engine::{Scheduler, SchedulerSettings, SchedulerState};
pub use error::{Result, SchedulerError};
pub use registry::{JobContext, JobHandler, JobRegistry};
pub use store::{FinishedExecution, JobStore, SqliteJobStore};
pub use types::{ExecutionStatus, JobConfig, JobExecution, ScheduledJob};
