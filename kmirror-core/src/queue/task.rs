// kmirror-core/src/queue/task.rs
use kmirror_common::error::Result;

use super::WorkQueue;

/// A unit of work scheduled on a [`WorkQueue`].
///
/// A task is consumed by the single call to `execute`. It may publish further
/// tasks to the queue it is given, and it must acknowledge itself exactly once
/// (usually through [`WorkQueue::ack_on_drop`] at the top of `execute`) so the
/// sentinel can tell when all work is done. Errors are reported by the engine
/// and never retried; a task that wants a retry publishes itself again.
pub trait Task: Send {
    /// Short identifier used in logs and failure reports.
    fn name(&self) -> String;

    fn execute(self: Box<Self>, queue: &WorkQueue) -> Result<()>;
}

/// Adapts a closure into a [`Task`]. The closure is responsible for
/// acknowledging, just like a hand-written task.
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F> FnTask<F>
where
    F: FnOnce(&WorkQueue) -> Result<()> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Box<Self> {
        Box::new(Self {
            name: name.into(),
            f,
        })
    }
}

impl<F> Task for FnTask<F>
where
    F: FnOnce(&WorkQueue) -> Result<()> + Send + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn execute(self: Box<Self>, queue: &WorkQueue) -> Result<()> {
        (self.f)(queue)
    }
}
