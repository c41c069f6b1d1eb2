//! Execution contexts: the workers a backend reserved for one caller

use crate::error::{FeatureflowError, Result};
use crate::utils::parallel::{ParallelExecutor, Serial};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Workers handed out by [`Backend::initialize`](super::Backend::initialize).
///
/// The context owns its thread pool. Releasing it, explicitly through
/// `Backend::teardown` or implicitly on drop, shuts the pool down and
/// decrements the owning backend's live-context count exactly once.
pub struct ExecutionContext {
    id: Uuid,
    backend: &'static str,
    num_workers: usize,
    pool: Option<rayon::ThreadPool>,
    live: bool,
    ledger: Arc<AtomicUsize>,
}

impl ExecutionContext {
    /// Register a new live context with `ledger`
    pub(crate) fn new(
        backend: &'static str,
        num_workers: usize,
        pool: Option<rayon::ThreadPool>,
        ledger: Arc<AtomicUsize>,
    ) -> Self {
        ledger.fetch_add(1, Ordering::SeqCst);
        let ctx = Self {
            id: Uuid::new_v4(),
            backend,
            num_workers,
            pool,
            live: true,
            ledger,
        };
        debug!(id = %ctx.id, backend, num_workers, "execution context started");
        ctx
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the backend that created this context
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Fail with `ResourceUnavailable` unless the context is live and was
    /// created by `backend`
    pub fn ensure_live(&self, backend: &str) -> Result<()> {
        if !self.live {
            return Err(FeatureflowError::ResourceUnavailable(format!(
                "execution context {} has been torn down",
                self.id
            )));
        }
        if self.backend != backend {
            return Err(FeatureflowError::ResourceUnavailable(format!(
                "execution context {} belongs to the {} backend, not {backend}",
                self.id, self.backend
            )));
        }
        Ok(())
    }

    /// Shut the pool down. Returns false when already released.
    pub fn release(&mut self) -> bool {
        if !self.live {
            return false;
        }
        self.live = false;
        self.pool = None;
        self.ledger.fetch_sub(1, Ordering::SeqCst);
        debug!(id = %self.id, backend = self.backend, "execution context released");
        true
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("num_workers", &self.num_workers)
            .field("live", &self.live)
            .finish()
    }
}

impl ParallelExecutor for ExecutionContext {
    fn parallelism(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.parallelism(),
            None => 1,
        }
    }

    fn map_indexed<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match &self.pool {
            Some(pool) => pool.map_indexed(n, f),
            None => Serial.map_indexed(n, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pooled(ledger: &Arc<AtomicUsize>, workers: usize) -> ExecutionContext {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .unwrap();
        ExecutionContext::new("distributed", workers, Some(pool), ledger.clone())
    }

    #[test]
    fn test_release_is_idempotent() {
        let ledger = Arc::new(AtomicUsize::new(0));
        let mut ctx = pooled(&ledger, 2);
        assert_eq!(ledger.load(Ordering::SeqCst), 1);
        assert!(ctx.release());
        assert!(!ctx.release());
        assert_eq!(ledger.load(Ordering::SeqCst), 0);
        drop(ctx);
        assert_eq!(ledger.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_releases() {
        let ledger = Arc::new(AtomicUsize::new(0));
        {
            let _a = pooled(&ledger, 1);
            let _b = pooled(&ledger, 1);
            assert_eq!(ledger.load(Ordering::SeqCst), 2);
        }
        assert_eq!(ledger.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ensure_live() {
        let ledger = Arc::new(AtomicUsize::new(0));
        let mut ctx = pooled(&ledger, 1);
        assert!(ctx.ensure_live("distributed").is_ok());
        assert!(matches!(
            ctx.ensure_live("local"),
            Err(FeatureflowError::ResourceUnavailable(_))
        ));
        ctx.release();
        assert!(matches!(
            ctx.ensure_live("distributed"),
            Err(FeatureflowError::ResourceUnavailable(_))
        ));
    }

    #[test]
    fn test_executes_on_its_pool() {
        let ledger = Arc::new(AtomicUsize::new(0));
        let ctx = pooled(&ledger, 3);
        assert_eq!(ctx.parallelism(), 3);
        let threads = ctx.map_indexed(6, |_| rayon::current_thread_index().is_some());
        assert!(threads.into_iter().all(|on_pool| on_pool));
    }

    #[test]
    fn test_released_context_runs_serially() {
        let ledger = Arc::new(AtomicUsize::new(0));
        let mut ctx = pooled(&ledger, 3);
        ctx.release();
        assert_eq!(ctx.parallelism(), 1);
        assert_eq!(ctx.map_indexed(3, |i| i), vec![0, 1, 2]);
    }
}
