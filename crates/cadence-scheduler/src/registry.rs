use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Passed to every handler invocation.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_name: String,
    pub execution_id: i64,
    /// Cancelled when the execution is recorded as `timeout`.
    ///
    /// Honouring it is voluntary: the scheduler never aborts a handler, so a
    /// handler that ignores the token runs to completion in the background
    /// and its result is discarded.
    pub cancellation_token: CancellationToken,
}

/// Type-erased async job body.
pub type JobHandler =
    Arc<dyn Fn(JobContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Box an async closure into a [`JobHandler`].
pub fn handler_fn<F, Fut>(f: F) -> JobHandler
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx: JobContext| f(ctx).boxed())
}

/// In-process map from handler id to job body.
///
/// Writers (registration) and readers (executor lookup) only hold the lock
/// for the map operation itself, never across I/O or an await point.
#[derive(Default)]
pub struct JobRegistry {
    handlers: RwLock<HashMap<String, JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handler for `handler_id`.
    pub fn insert(&self, handler_id: &str, handler: JobHandler) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.insert(handler_id.to_string(), handler).is_some() {
            debug!(handler = handler_id, "job handler replaced");
        } else {
            debug!(handler = handler_id, "job handler registered");
        }
    }

    pub fn get(&self, handler_id: &str) -> Option<JobHandler> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(handler_id).map(Arc::clone)
    }

    pub fn contains(&self, handler_id: &str) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.contains_key(handler_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
