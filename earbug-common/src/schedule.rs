//! Periodic background tasks
//!
//! Background loops tick on a fixed interval until their cancellation token
//! fires. A tick that overruns the interval delays the next one instead of
//! bursting to catch up.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A named loop running on a fixed interval
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    name: String,
    interval: Duration,
    run_immediately: bool,
}

impl PeriodicTask {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            run_immediately: true,
        }
    }

    /// Whether the first run happens at spawn time (default) or after one interval
    pub fn run_immediately(mut self, run_immediately: bool) -> Self {
        self.run_immediately = run_immediately;
        self
    }

    /// Spawn the loop; `tick` is awaited to completion before the next tick
    ///
    /// Cancellation is observed between ticks and while a tick is running.
    pub fn spawn<F, Fut>(self, cancel: CancellationToken, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            if !self.run_immediately {
                // First tick of a tokio interval completes immediately
                ticker.tick().await;
            }

            info!(task = %self.name, interval_secs = self.interval.as_secs(), "Periodic task started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                debug!(task = %self.name, "Periodic tick");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick() => {}
                }
            }

            info!(task = %self.name, "Periodic task stopped");
        })
    }
}
