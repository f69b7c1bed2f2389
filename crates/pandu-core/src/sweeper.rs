//! Periodic background eviction.
//!
//! Probabilistic purging only runs on write, so a quiet proxy would hold
//! expired state forever. The sweeper bounds that by purging both stores on
//! a fixed interval.

use crate::clock::Clock;
use crate::guard::RateGuard;
use crate::memory::ConversationMemory;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Handle to a running sweep task.
pub struct Sweeper {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Start sweeping every `every`. Must be called inside a tokio runtime.
    pub fn spawn(
        memory: Arc<ConversationMemory>,
        guard: Arc<RateGuard>,
        clock: Arc<dyn Clock>,
        every: Duration,
    ) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        info!("sweeper started (interval_ms={})", every.as_millis());
        let task = tokio::spawn(async move {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = tick.tick() => {
                        let now = clock.now();
                        let sessions = memory.purge_idle(now);
                        let rate_entries = guard.purge_stale(now);
                        debug!("sweep finished (sessions={sessions}, rate_entries={rate_entries})");
                    }
                }
            }
        });
        Self {
            stop: Some(stop),
            task,
        }
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!("sweeper task ended abnormally (error={err})");
        }
        info!("sweeper stopped");
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}
