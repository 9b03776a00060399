//! Health Monitor (C3)
//!
//! Periodically probes every registered provider in parallel and flips its
//! `healthy` flag. Grounded on the teacher pack's session-supervisor idiom of
//! a spawned task driven by `tokio::select!` against a `watch::Receiver<bool>`
//! stop signal.

use std::sync::Arc;
use std::time::Duration;

use provider_core::provider::Cancellation;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::status::ProviderHandle;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HealthMonitor {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawn the background probe loop. Does nothing useful if `interval` is
    /// zero or negative — callers should only call this when a positive
    /// `health_check_interval` was configured (§4.3).
    pub fn spawn(providers: Arc<Vec<Arc<ProviderHandle>>>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so the pool starts with
            // whatever default health state providers were constructed with.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        probe_all(&providers).await;
                    }
                }
            }
        });

        Self { stop_tx, join }
    }

    /// Stop the monitor. Idempotent: calling it twice, or calling it after the
    /// task has already exited, is a no-op.
    pub async fn close(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
    }
}

async fn probe_all(providers: &[Arc<ProviderHandle>]) {
    let probes = providers.iter().map(|handle| async move {
        let outcome = tokio::time::timeout(PROBE_TIMEOUT, handle.provider.health(Cancellation::none())).await;
        let healthy = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(provider = %handle.name, error = %err, "health probe failed");
                false
            }
            Err(_) => {
                warn!(provider = %handle.name, timeout_secs = PROBE_TIMEOUT.as_secs(), "health probe timed out");
                false
            }
        };
        handle.set_healthy(healthy).await;
        handle.touch_last_check().await;
        debug!(provider = %handle.name, healthy, "health probe complete");
    });

    futures::future::join_all(probes).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeProvider;
    use crate::status::ProviderHandleConfig;

    #[tokio::test(start_paused = true)]
    async fn probe_flips_healthy_flag_based_on_health_result() {
        let failing = Arc::new(ProviderHandle::new(ProviderHandleConfig::new(
            "flaky",
            Arc::new(FakeProvider::unhealthy("flaky")),
        )));
        let providers = Arc::new(vec![Arc::clone(&failing)]);

        let monitor = HealthMonitor::spawn(providers, Duration::from_millis(50));
        tokio::time::advance(Duration::from_millis(60)).await;
        // allow the spawned task to run after the clock advance
        tokio::task::yield_now().await;

        assert!(!failing.is_healthy().await);
        monitor.close().await;
    }

    #[tokio::test]
    async fn probe_all_never_touches_active_loads_or_metrics() {
        let handle = Arc::new(ProviderHandle::new(ProviderHandleConfig::new(
            "p1",
            Arc::new(FakeProvider::healthy("p1")),
        )));
        let before = handle.active_loads();
        probe_all(&[Arc::clone(&handle)]).await;
        assert_eq!(handle.active_loads(), before);
        assert_eq!(handle.metrics.total(), 0);
    }
}
