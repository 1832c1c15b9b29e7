//! Worker contexts for adapter dispatch.
//!
//! The session manager never calls the adapter on the caller's stack. It
//! hands a [`Job`] to an [`Executor`]: [`TokioExecutor`] in production,
//! [`InlineExecutor`] when a test needs a deterministic schedule.

use tokio::runtime::Handle;
use tracing::debug;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs each job as its own task on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor bound to the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }
}

/// Runs jobs immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        debug!("Running job inline");
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn inline_runs_before_returning() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        InlineExecutor.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tokio_executor_runs_spawned_job() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        TokioExecutor::current().execute(Box::new(move || {
            let _ = tx.send(());
        }));
        assert!(rx.await.is_ok());
    }
}
