// kmirror-core/src/queue/shutdown.rs
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::info;

/// Broadcast cancellation shared by workers and the sentinel.
///
/// Cancelling drops the only sender, which disconnects every clone of the
/// receiver at once, so it can be waited on inside `select!` next to the task
/// channel.
#[derive(Clone)]
pub struct ShutdownSignal {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            receiver: rx,
        }
    }

    /// Idempotent. Returns true for the call that actually cancelled.
    pub fn cancel(&self) -> bool {
        let fired = self.trigger.lock().take().is_some();
        if fired {
            info!("shutdown requested, workers stop after their current task");
        }
        fired
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
