//! Poll Scheduler - owns the repeating option-chain timer
//!
//! Idle -> Running -> Idle. Starting while running and stopping while idle
//! are no-ops. Ticks run sequentially inside the scheduler task, so a slow
//! tick delays (and may skip) the next one instead of overlapping it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::SyncInner;

/// Default polling period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

struct SchedulerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Single repeating timer driving primary fetches
pub struct PollScheduler {
    period: Duration,
    handle: Option<SchedulerHandle>,
}

impl PollScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            handle: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }

    /// Arm the timer. The first tick fires immediately.
    ///
    /// Returns false if the scheduler was already running.
    pub(crate) fn start(&mut self, inner: Arc<SyncInner>) -> bool {
        if self.is_running() {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let period = self.period;
        let task = tokio::spawn(run_loop(inner, period, shutdown_rx));

        self.handle = Some(SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        });
        info!(period_ms = period.as_millis() as u64, "⏱️ Polling started");
        true
    }

    /// Disarm the timer. An in-flight tick is allowed to finish; its result is
    /// discarded by the generation check.
    ///
    /// Returns false if the scheduler was already idle.
    pub fn stop(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let _ = handle.shutdown.send(());
                info!("⏹️ Polling stopped");
                true
            }
            None => false,
        }
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

async fn run_loop(inner: Arc<SyncInner>, period: Duration, mut shutdown: oneshot::Receiver<()>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            // Fires on stop() and when the handle is dropped
            _ = &mut shutdown => break,
            _ = interval.tick() => {}
        }

        let outcome = inner.run_tick().await;
        debug!(outcome = ?outcome, "Tick complete");
    }

    debug!("Scheduler loop exited");
}
