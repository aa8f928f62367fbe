//! Periodic live-data polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use wxlink_core::IngestionSink;

use crate::client::GatewayClient;

/// Default time between live-data requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Poll counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    /// Completed requests.
    pub polls: u64,
    /// Polls that produced no usable response.
    pub failures: u64,
    /// Polls whose payload contained an item that could not be located.
    pub partial: u64,
}

/// Handle to a running poller task.
pub struct PollerHandle {
    cancel: CancellationToken,
    stats: watch::Receiver<PollerStats>,
    task: JoinHandle<PollerStats>,
}

impl PollerHandle {
    pub fn stats(&self) -> PollerStats {
        *self.stats.borrow()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop polling and wait for the in-flight request, if any.
    pub async fn shutdown(self) -> PollerStats {
        self.cancel.cancel();
        let last = *self.stats.borrow();
        self.task.await.unwrap_or(last)
    }
}

/// Spawn a task that requests live data every `interval`.
///
/// The first request goes out immediately. A slow gateway delays the next
/// tick instead of causing a burst of catch-up requests.
pub fn spawn_poller(
    client: Arc<GatewayClient>,
    sink: Arc<dyn IngestionSink>,
    interval: Duration,
    cancel: CancellationToken,
) -> PollerHandle {
    let (stats_tx, stats_rx) = watch::channel(PollerStats::default());
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let mut stats = PollerStats::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(endpoint = %client.link().endpoint(), ?interval, "poller started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                r = client.read_live_data(sink.as_ref()) => r,
            };
            stats.polls += 1;
            match result {
                Some(walk) if !walk.is_complete() => stats.partial += 1,
                Some(_) => {}
                None => {
                    stats.failures += 1;
                    debug!(failures = stats.failures, "poll failed");
                }
            }
            stats_tx.send_replace(stats);
        }

        client.link().disconnect().await;
        stats_tx.send_replace(stats);
        info!(?stats, "poller stopped");
        stats
    });

    PollerHandle {
        cancel,
        stats: stats_rx,
        task,
    }
}
