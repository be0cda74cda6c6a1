// kmirror-core/src/queue/mod.rs
//! A bounded, self-terminating work queue.
//!
//! Tasks may publish further tasks while they run, so the amount of work is
//! not known up front. The queue keeps two monotonic counters, `enqueued` and
//! `acknowledged`; the [`sentinel`] closes the queue once they stay equal for
//! a few polls.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use kmirror_common::error::KmError;
use kmirror_common::pipeline::TaskFailure;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

pub mod sentinel;
pub mod shutdown;
pub mod task;

pub use sentinel::{QuiescenceDetector, Sentinel, SentinelState};
pub use shutdown::ShutdownSignal;
pub use task::{FnTask, Task};

pub const DEFAULT_BUFFER: usize = 128;
pub const DEFAULT_SENTINEL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_QUIET_THRESHOLD: u32 = 3;
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Tasks held in memory before `publish` falls back to running inline.
    pub buffer: usize,
    pub sentinel_interval: Duration,
    /// Consecutive drained polls required before the queue is closed.
    pub quiet_threshold: u32,
    pub progress_interval: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_BUFFER,
            sentinel_interval: DEFAULT_SENTINEL_INTERVAL,
            quiet_threshold: DEFAULT_QUIET_THRESHOLD,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// How `publish` handled a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Buffered for a worker.
    Queued,
    /// Executed on the publisher's own thread because the buffer was full or
    /// the queue was already closed.
    Inline,
    /// Counted but never run because the run was cancelled.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub acknowledged: u64,
    pub executed: u64,
    pub inline_executions: u64,
    pub skipped: u64,
}

impl QueueStats {
    pub fn remaining(&self) -> u64 {
        self.enqueued.saturating_sub(self.acknowledged)
    }
}

pub struct WorkQueue {
    sender: RwLock<Option<Sender<Box<dyn Task>>>>,
    receiver: Receiver<Box<dyn Task>>,
    enqueued: AtomicU64,
    acknowledged: AtomicU64,
    executed: AtomicU64,
    inline_executions: AtomicU64,
    skipped: AtomicU64,
    failures: Mutex<Vec<TaskFailure>>,
    shutdown: ShutdownSignal,
}

impl WorkQueue {
    pub fn new(buffer: usize) -> Arc<Self> {
        Self::with_shutdown(buffer, ShutdownSignal::new())
    }

    /// A queue that stops starting new tasks once `shutdown` fires.
    pub fn with_shutdown(buffer: usize, shutdown: ShutdownSignal) -> Arc<Self> {
        let (tx, rx) = bounded(buffer);
        Arc::new(Self {
            sender: RwLock::new(Some(tx)),
            receiver: rx,
            enqueued: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            inline_executions: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failures: Mutex::new(Vec::new()),
            shutdown,
        })
    }

    /// Counts the task as enqueued and hands it to a worker without blocking.
    /// When the buffer is full the task runs right here instead, so a fan-out
    /// storm never blocks the publisher and never drops work; ordering with
    /// respect to queued siblings is not preserved in that case.
    ///
    /// After cancellation the task is counted and dropped unexecuted, so a
    /// parent that is still running cannot start its subtree.
    pub fn publish(&self, task: Box<dyn Task>) -> Dispatch {
        let name = task.name();
        let enqueued = self.enqueued.fetch_add(1, Ordering::SeqCst) + 1;

        if self.shutdown.is_cancelled() {
            self.skipped.fetch_add(1, Ordering::SeqCst);
            debug!(task = %name, enqueued, "run cancelled, skipping task");
            return Dispatch::Skipped;
        }

        let rejected = {
            let sender = self.sender.read();
            match sender.as_ref() {
                Some(tx) => match tx.try_send(task) {
                    Ok(()) => {
                        debug!(task = %name, enqueued, "task enqueued");
                        return Dispatch::Queued;
                    }
                    Err(TrySendError::Full(task)) => {
                        debug!(task = %name, enqueued, "queue buffer full, running task inline");
                        task
                    }
                    Err(TrySendError::Disconnected(task)) => {
                        warn!(task = %name, "queue receiver gone, running task inline");
                        task
                    }
                },
                None => {
                    warn!(task = %name, "queue already closed, running task inline");
                    task
                }
            }
        };

        self.inline_executions.fetch_add(1, Ordering::Relaxed);
        self.run(rejected);
        Dispatch::Inline
    }

    /// The stream workers pull from. It ends once the queue is closed and the
    /// buffer has been drained.
    pub fn consume(&self) -> Receiver<Box<dyn Task>> {
        self.receiver.clone()
    }

    pub fn acknowledge(&self) {
        let acknowledged = self.acknowledged.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(acknowledged, "task acknowledged");
        debug_assert!(
            acknowledged <= self.enqueued.load(Ordering::SeqCst),
            "more acknowledgements than published tasks"
        );
    }

    /// Acknowledges when the guard is dropped, including on early return and
    /// unwinding.
    pub fn ack_on_drop(&self) -> AckGuard<'_> {
        AckGuard { queue: self }
    }

    /// Closes the publishing side. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let closed = self.sender.write().take().is_some();
        if closed {
            let stats = self.stats();
            info!(
                enqueued = stats.enqueued,
                acknowledged = stats.acknowledged,
                "work queue closed"
            );
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::SeqCst)
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::SeqCst)
    }

    /// True when every published task has been acknowledged. The
    /// acknowledged counter is read first so a concurrent publish can only
    /// make the answer more conservative.
    pub fn is_drained(&self) -> bool {
        let acknowledged = self.acknowledged();
        acknowledged >= self.enqueued()
    }

    pub fn stats(&self) -> QueueStats {
        let acknowledged = self.acknowledged();
        QueueStats {
            enqueued: self.enqueued(),
            acknowledged,
            executed: self.executed.load(Ordering::SeqCst),
            inline_executions: self.inline_executions.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn failures(&self) -> Vec<TaskFailure> {
        self.failures.lock().clone()
    }

    /// Runs one task, isolating its error or panic from the caller.
    pub(crate) fn run(&self, task: Box<dyn Task>) {
        let name = task.name();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.execute(self)));
        self.executed.fetch_add(1, Ordering::SeqCst);

        let err = match outcome {
            Ok(Ok(())) => {
                trace!(task = %name, "task finished");
                return;
            }
            Ok(Err(e)) => e,
            Err(payload) => KmError::WorkerPanic(panic_message(payload)),
        };
        error!(task = %name, error = %err, "task failed");
        self.failures.lock().push(TaskFailure {
            task: name,
            error: err,
        });
    }
}

/// See [`WorkQueue::ack_on_drop`].
#[must_use = "the task is acknowledged when the guard is dropped"]
pub struct AckGuard<'a> {
    queue: &'a WorkQueue,
}

impl Drop for AckGuard<'_> {
    fn drop(&mut self) {
        self.queue.acknowledge();
    }
}

pub(crate) fn panic_message(e: Box<dyn std::any::Any + Send>) -> String {
    match e.downcast_ref::<&'static str>() {
        Some(s) => (*s).to_string(),
        None => match e.downcast_ref::<String>() {
            Some(s) => s.clone(),
            None => "Unknown panic payload".to_string(),
        },
    }
}
