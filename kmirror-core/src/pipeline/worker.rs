// kmirror-core/src/pipeline/worker.rs
use std::sync::Arc;

use crossbeam_channel::select;
use kmirror_common::error::{KmError, Result};
use threadpool::ThreadPool;
use tracing::{debug, error, instrument};

use crate::queue::{ShutdownSignal, WorkQueue};

/// A fixed set of worker threads draining one [`WorkQueue`].
///
/// Every pool thread runs one long-lived worker loop rather than one job per
/// task, so all of them pull from the same queue stream.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn spawn(workers: usize, queue: &Arc<WorkQueue>, shutdown: &ShutdownSignal) -> Self {
        let workers = workers.max(1);
        let pool = threadpool::Builder::new()
            .num_threads(workers)
            .thread_name("kmirror-worker".to_string())
            .build();

        for id in 0..workers {
            let queue_clone = Arc::clone(queue);
            let shutdown_clone = shutdown.clone();
            pool.execute(move || worker_loop(id, queue_clone, shutdown_clone));
        }

        debug!("Worker pool started with {} workers.", workers);
        Self { pool }
    }

    pub fn size(&self) -> usize {
        self.pool.max_count()
    }

    /// Waits for every worker. Workers exit when the queue stream ends or the
    /// shutdown signal fires.
    pub fn join(self) -> Result<()> {
        self.pool.join();
        match self.pool.panic_count() {
            0 => Ok(()),
            panicked => {
                error!("{} worker(s) panicked", panicked);
                Err(KmError::WorkerPanic(format!(
                    "{panicked} worker thread(s) panicked"
                )))
            }
        }
    }
}

#[instrument(skip_all, fields(worker = id))]
fn worker_loop(id: usize, queue: Arc<WorkQueue>, shutdown: ShutdownSignal) {
    let tasks = queue.consume();
    debug!("[worker-{}] waiting for tasks", id);

    loop {
        // Checked before every pull so a cancelled run never starts new work,
        // even when tasks are still buffered.
        if shutdown.is_cancelled() {
            debug!("[worker-{}] shutdown observed, exiting", id);
            return;
        }

        select! {
            recv(shutdown.receiver()) -> _ => {
                debug!("[worker-{}] shutdown observed, exiting", id);
                return;
            }
            recv(tasks) -> msg => match msg {
                Ok(task) => {
                    debug!("[worker-{}] executing {}", id, task.name());
                    queue.run(task);
                }
                Err(_) => {
                    debug!("[worker-{}] queue closed, exiting", id);
                    return;
                }
            }
        }
    }
}
