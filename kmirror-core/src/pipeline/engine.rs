// kmirror-core/src/pipeline/engine.rs
use std::sync::Arc;
use std::time::Instant;

use kmirror_common::error::{KmError, Result};
use kmirror_common::pipeline::RunReport;
use tracing::{debug, error, info, instrument};

use super::worker::WorkerPool;
use crate::queue::{QueueOptions, Sentinel, ShutdownSignal, Task, WorkQueue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub workers: usize,
    pub queue: QueueOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            queue: QueueOptions::default(),
        }
    }
}

pub fn default_worker_count() -> usize {
    std::cmp::max(1, num_cpus::get_physical().saturating_sub(1)).min(6)
}

/// Runs a dynamically growing set of tasks to completion.
pub struct Engine {
    options: EngineOptions,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Publishes `roots`, lets workers drain everything they fan out into, and
    /// returns once the sentinel has closed the queue (or `shutdown` fired)
    /// and every worker has exited.
    ///
    /// Task failures never abort the run; they are collected in the report.
    #[instrument(skip_all, name = "engine_run", fields(workers = self.options.workers, roots = roots.len()))]
    pub fn run(&self, roots: Vec<Box<dyn Task>>, shutdown: ShutdownSignal) -> Result<RunReport> {
        let start_time = Instant::now();
        let queue = WorkQueue::with_shutdown(self.options.queue.buffer, shutdown.clone());
        let pool = WorkerPool::spawn(self.options.workers, &queue, &shutdown);

        for root in roots {
            debug!("Publishing root task {}", root.name());
            queue.publish(root);
        }

        let sentinel = match Sentinel::spawn(Arc::clone(&queue), &self.options.queue, shutdown.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to start sentinel: {}", e);
                queue.close();
                let _ = pool.join();
                return Err(e);
            }
        };

        let pool_result = pool.join();
        // Lets the sentinel exit when the pool stopped because of a shutdown.
        queue.close();
        if sentinel.join().is_err() {
            error!("Sentinel thread panicked");
        }
        pool_result?;

        let stats = queue.stats();
        let report = RunReport {
            enqueued: stats.enqueued,
            acknowledged: stats.acknowledged,
            executed: stats.executed,
            inline_executions: stats.inline_executions,
            skipped: stats.skipped,
            cancelled: shutdown.is_cancelled(),
            failures: queue.failures(),
            duration_secs: start_time.elapsed().as_secs_f64(),
        };
        info!(
            executed = report.executed,
            failed = report.failures.len(),
            inline = report.inline_executions,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "engine run finished"
        );
        Ok(report)
    }

    /// Like [`Engine::run`] but turns a report with failures into an error
    /// carrying the summary.
    pub fn run_to_completion(
        &self,
        roots: Vec<Box<dyn Task>>,
        shutdown: ShutdownSignal,
    ) -> Result<RunReport> {
        let report = self.run(roots, shutdown)?;
        if report.is_success() {
            Ok(report)
        } else {
            Err(KmError::Generic(report.summary()))
        }
    }
}
