//! Shared state of the lazy-evaluation subsystem.
//!
//! A [`QueryContext`] bundles what would otherwise be process globals: the
//! re-entrant query lock serializing all planning and top-level dispatch, the
//! worker pool segments run on, the lazy-node threshold, and the metrics.
//! Create one at start-up and hand the same `Arc` to every
//! [`Planner`](crate::planner::Planner) that should share the lock.

use crate::config::QueryConfig;
use crate::metrics::QueryMetrics;
use anyhow::Result;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

pub struct QueryContext {
    lock: ReentrantMutex<()>,
    config: QueryConfig,
    max_lazy_node_size: AtomicUsize,
    pool: ThreadPool,
    metrics: QueryMetrics,
}

impl QueryContext {
    /// # Errors
    ///
    /// Fails if the worker pool cannot be started.
    pub fn new(config: QueryConfig) -> Result<Arc<Self>> {
        let threads = config.num_threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sframe-query-{i}"))
            .build()?;
        debug!(threads, block_size = config.block_size, "query context started");
        Ok(Arc::new(Self {
            lock: ReentrantMutex::new(()),
            max_lazy_node_size: AtomicUsize::new(config.max_lazy_node_size),
            config,
            pool,
            metrics: QueryMetrics::new(),
        }))
    }

    /// Take the query lock. The same thread may take it again while holding it.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    #[must_use]
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Worker threads available for segment execution.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    #[must_use]
    pub fn max_lazy_node_size(&self) -> usize {
        self.max_lazy_node_size.load(Ordering::Relaxed)
    }

    pub fn set_max_lazy_node_size(&self, n: usize) {
        self.max_lazy_node_size.store(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}
