use super::metrics::{MetricsSink, HEARTBEAT};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodic liveness signal bound to the service lifecycle.
///
/// Increments [`HEARTBEAT`] once per interval, the first time one interval
/// after start. Stops on [`Heartbeat::shutdown`] or when dropped.
pub struct Heartbeat {
    shutdown_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Spawn the heartbeat task. Must be called inside a tokio runtime.
    pub fn start(interval: Duration, metrics: Arc<dyn MetricsSink>) -> Self {
        let shutdown_token = CancellationToken::new();
        let token = shutdown_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval_ms = interval.as_millis() as u64, "Heartbeat started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("Heartbeat stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        metrics.increment(HEARTBEAT);
                        tracing::trace!(key = HEARTBEAT, "Heartbeat");
                    }
                }
            }
        });

        Self {
            shutdown_token,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(&mut self) {
        self.shutdown_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Heartbeat task ended abnormally");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
