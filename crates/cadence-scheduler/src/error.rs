use thiserror::Error;

/// Errors returned synchronously by the scheduler API.
///
/// Runtime failures of a job (missing handler, handler error, timeout) are
/// never returned here; they are persisted on the job's execution record.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A registration argument was missing or empty.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The job configuration failed validation.
    #[error("Invalid job config: {0}")]
    InvalidConfig(String),

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No scheduled job with the given name exists in the store.
    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    /// `start()` was called while the scheduler was not stopped.
    #[error("Scheduler is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
