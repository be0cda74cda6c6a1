// kmirror-core/src/queue/sentinel.rs
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::select;
use kmirror_common::error::Result;
use tracing::{debug, info};

use super::{QueueOptions, ShutdownSignal, WorkQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelState {
    Active,
    Closed,
}

/// Debounced "all work is done" detector.
///
/// A task that acknowledges just before publishing its children makes the
/// counters look equal for an instant, so closure needs `threshold`
/// consecutive quiet observations; any observation with outstanding work
/// starts the count over.
#[derive(Debug, Clone)]
pub struct QuiescenceDetector {
    threshold: u32,
    quiet_polls: u32,
    state: SentinelState,
}

impl QuiescenceDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            quiet_polls: 0,
            state: SentinelState::Active,
        }
    }

    pub fn observe(&mut self, acknowledged: u64, enqueued: u64) -> SentinelState {
        if self.state == SentinelState::Closed {
            return self.state;
        }
        if acknowledged >= enqueued {
            self.quiet_polls += 1;
        } else {
            self.quiet_polls = 0;
        }
        if self.quiet_polls >= self.threshold {
            self.state = SentinelState::Closed;
        }
        self.state
    }

    pub fn quiet_polls(&self) -> u32 {
        self.quiet_polls
    }

    pub fn state(&self) -> SentinelState {
        self.state
    }
}

/// Background thread that closes the queue once it has been drained for
/// long enough, and logs progress while it waits.
pub struct Sentinel;

impl Sentinel {
    pub fn spawn(
        queue: Arc<WorkQueue>,
        options: &QueueOptions,
        shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>> {
        let interval = options.sentinel_interval;
        let progress_interval = options.progress_interval;
        let mut detector = QuiescenceDetector::new(options.quiet_threshold);

        let handle = thread::Builder::new()
            .name("kmirror-sentinel".to_string())
            .spawn(move || {
                debug!(?interval, threshold = detector.threshold, "sentinel started");
                let mut last_progress = Instant::now();
                loop {
                    select! {
                        recv(shutdown.receiver()) -> _ => {
                            debug!("sentinel observed shutdown, closing queue");
                            queue.close();
                            return;
                        }
                        default(interval) => {}
                    }

                    if queue.is_closed() {
                        debug!("queue closed elsewhere, sentinel exiting");
                        return;
                    }

                    let acknowledged = queue.acknowledged();
                    let enqueued = queue.enqueued();

                    if last_progress.elapsed() >= progress_interval {
                        info!(
                            acknowledged,
                            enqueued,
                            remaining = enqueued.saturating_sub(acknowledged),
                            "sentinel progress"
                        );
                        last_progress = Instant::now();
                    }

                    if detector.observe(acknowledged, enqueued) == SentinelState::Closed {
                        info!(
                            acknowledged,
                            enqueued,
                            quiet_polls = detector.quiet_polls(),
                            "sentinel closing queue"
                        );
                        queue.close();
                        return;
                    }
                }
            })?;
        Ok(handle)
    }
}
