// src/ingest/scheduler.rs
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle to a long-lived periodic task (collection loop, health-check loop).
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop and wait for it to exit. A tick already in progress
    /// runs to completion; the loop only observes cancellation between ticks.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                tracing::warn!(task = self.name, error = %e, "background task ended abnormally");
            }
        }
    }
}

/// Spawn `tick` every `interval` until stopped. The first tick fires immediately.
pub fn spawn_periodic<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> BackgroundTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let period = interval.max(Duration::from_millis(10));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tick().await;
        }
        tracing::debug!(task = name, "periodic task stopped");
    });

    BackgroundTask {
        name,
        cancel,
        handle,
    }
}
