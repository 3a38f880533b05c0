//! Worker backends that run dispatches.

use qlb_core::errors::{ErrorInfo, QlbError};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Unit of work handed to a backend.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Pool that runs dispatch tasks.
///
/// Tasks report back through their own channel, so `spawn` never returns a
/// handle.
pub trait WorkerPool {
    /// Schedules a task.
    fn spawn(&self, task: Task);

    /// Number of tasks that may run at once.
    fn parallelism(&self) -> usize {
        1
    }
}

/// Runs every task immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlinePool;

impl WorkerPool for InlinePool {
    fn spawn(&self, task: Task) {
        task();
    }
}

/// Dedicated rayon thread pool.
pub struct RayonPool {
    pool: ThreadPool,
    threads: usize,
}

impl RayonPool {
    /// Builds a pool with `threads` workers; 0 picks the number of CPUs.
    pub fn new(threads: usize) -> Result<Self, QlbError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("qlb-worker-{index}"))
            .build()
            .map_err(|err| {
                QlbError::Config(
                    ErrorInfo::new("backend.thread_pool", err.to_string())
                        .with_context("threads", threads.to_string()),
                )
            })?;
        let threads = pool.current_num_threads();
        Ok(Self { pool, threads })
    }
}

impl WorkerPool for RayonPool {
    fn spawn(&self, task: Task) {
        self.pool.spawn(task);
    }

    fn parallelism(&self) -> usize {
        self.threads
    }
}

impl std::fmt::Debug for RayonPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayonPool")
            .field("threads", &self.threads)
            .finish()
    }
}
