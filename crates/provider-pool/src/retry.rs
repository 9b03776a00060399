//! Retry / Failover Engine (C7)
//!
//! Bounded retry loop with cross-provider diversion on failure. Grounded on
//! the teacher pack's `fetch_single_priority_with_fallback`: iterate
//! candidates, accumulate the last error, wrap it once the budget is
//! exhausted.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use provider_core::error::{PoolError, ProviderError};
use provider_core::provider::Cancellation;
use tracing::{instrument, warn};

use crate::selector::Selector;
use crate::status::ProviderHandle;

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// How long a Failover demotion lasts before the provider is re-enabled for
/// unrelated calls, per §4.7.
const FAILOVER_DEMOTION: Duration = Duration::from_millis(100);

/// Run `action` against a provider chosen by `selector`, retrying up to
/// `config.max_retries + 1` times total, diverting to a different provider
/// on failure per the selection strategy.
#[instrument(skip(providers, selector, action, cancel), fields(attempts = config.max_retries + 1))]
pub async fn call_with_retry<T, F, Fut>(
    providers: &[Arc<ProviderHandle>],
    selector: &Selector,
    config: RetryConfig,
    mut cancel: Cancellation,
    action: F,
) -> Result<T, PoolError>
where
    F: Fn(Arc<ProviderHandle>) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut tried: Vec<String> = Vec::new();
    let mut last_error: Option<RetryFailure> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 && !config.retry_delay.is_zero() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PoolError::Cancelled),
                () = tokio::time::sleep(config.retry_delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let handle = match selector.select(providers).await {
            Ok(handle) => handle,
            Err(pool_err) => {
                last_error = Some(RetryFailure::Selection(pool_err));
                continue;
            }
        };

        let _load_guard = handle.enter();
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ProviderError::Other("operation cancelled".into())),
            result = action(Arc::clone(&handle)) => result,
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(value) => {
                handle.metrics.record_request(true, elapsed_ms).await;
                if let Some(circuit) = &handle.circuit {
                    circuit.record_success().await;
                }
                return Ok(value);
            }
            Err(err) => {
                handle.metrics.record_request(false, elapsed_ms).await;
                if let Some(circuit) = &handle.circuit {
                    circuit.record_failure().await;
                }

                let already_tried = tried.contains(&handle.name);
                if already_tried && attempt > 0 {
                    warn!(provider = %handle.name, "repeated failure on same provider, marking unhealthy");
                    handle.set_healthy(false).await;
                }
                tried.push(handle.name.clone());

                if selector.strategy() == crate::selector::SelectionStrategy::Failover {
                    handle.set_healthy(false).await;
                    schedule_reenable(Arc::clone(&handle));
                }

                last_error = Some(RetryFailure::Provider(handle.name.clone(), err));
            }
        }
    }

    match last_error.expect("at least one attempt runs when max_retries >= 0") {
        RetryFailure::Selection(pool_err) => Err(pool_err),
        RetryFailure::Provider(provider, source) => Err(PoolError::AllAttemptsFailed { provider, source }),
    }
}

/// The two ways an attempt can fail: no eligible provider to even try, or a
/// tried provider's call itself erroring out.
enum RetryFailure {
    Selection(PoolError),
    Provider(String, ProviderError),
}

/// Re-enable a temporarily demoted provider after `FAILOVER_DEMOTION`, so
/// unrelated calls are not penalised long-term for one Failover retry.
fn schedule_reenable(handle: Arc<ProviderHandle>) {
    tokio::spawn(async move {
        tokio::time::sleep(FAILOVER_DEMOTION).await;
        handle.set_healthy(true).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitState;
    use crate::selector::SelectionStrategy;
    use crate::status::ProviderHandleConfig;
    use crate::test_support::FakeProvider;

    fn handle(name: &str, provider: FakeProvider) -> Arc<ProviderHandle> {
        Arc::new(ProviderHandle::new(ProviderHandleConfig::new(
            name,
            Arc::new(provider),
        )))
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_retrying() {
        let providers = vec![handle("a", FakeProvider::healthy("a"))];
        let selector = Selector::new(SelectionStrategy::RoundRobin);

        let result = call_with_retry(
            &providers,
            &selector,
            RetryConfig::default(),
            Cancellation::none(),
            |p| async move { p.provider.generate("hi", &Default::default()).await.map(|c| c.content) },
        )
        .await
        .unwrap();

        assert_eq!(result, "a: hi");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_returns_all_attempts_failed() {
        let providers = vec![handle("a", FakeProvider::unhealthy("a"))];
        let selector = Selector::new(SelectionStrategy::RoundRobin);
        providers[0].set_healthy(true).await;

        let result: Result<String, PoolError> = call_with_retry(
            &providers,
            &selector,
            RetryConfig {
                max_retries: 2,
                retry_delay: Duration::from_millis(10),
            },
            Cancellation::none(),
            |p| async move { p.provider.generate("hi", &Default::default()).await.map(|c| c.content) },
        )
        .await;

        assert!(matches!(result, Err(PoolError::AllAttemptsFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn no_eligible_provider_for_the_whole_budget_returns_no_healthy_providers_not_a_panic() {
        let providers = vec![handle("a", FakeProvider::healthy("a"))];
        providers[0].set_healthy(false).await;
        let selector = Selector::new(SelectionStrategy::RoundRobin);

        let result: Result<String, PoolError> = call_with_retry(
            &providers,
            &selector,
            RetryConfig {
                max_retries: 2,
                retry_delay: Duration::from_millis(10),
            },
            Cancellation::none(),
            |p| async move { p.provider.generate("hi", &Default::default()).await.map(|c| c.content) },
        )
        .await;

        assert!(matches!(result, Err(PoolError::NoHealthyProviders)));
    }

    #[tokio::test]
    async fn active_loads_returns_to_zero_after_success_and_after_failure() {
        let providers = vec![handle("a", FakeProvider::healthy("a"))];
        let selector = Selector::new(SelectionStrategy::RoundRobin);

        let _ = call_with_retry(
            &providers,
            &selector,
            RetryConfig::default(),
            Cancellation::none(),
            |p| async move { p.provider.generate("hi", &Default::default()).await.map(|c| c.content) },
        )
        .await;
        assert_eq!(providers[0].active_loads(), 0);

        providers[0].set_healthy(false).await;
        let _ = call_with_retry(
            &providers,
            &selector,
            RetryConfig {
                max_retries: 0,
                retry_delay: Duration::ZERO,
            },
            Cancellation::none(),
            |p| async move { p.provider.generate("hi", &Default::default()).await.map(|c| c.content) },
        )
        .await;
        assert_eq!(providers[0].active_loads(), 0);
    }

    #[tokio::test]
    async fn circuit_opens_after_enough_retry_failures() {
        let providers = vec![handle("a", FakeProvider::unhealthy("a"))];
        let selector = Selector::new(SelectionStrategy::RoundRobin);

        let _: Result<String, PoolError> = call_with_retry(
            &providers,
            &selector,
            RetryConfig {
                max_retries: 5,
                retry_delay: Duration::ZERO,
            },
            Cancellation::none(),
            |p| async move { p.provider.generate("hi", &Default::default()).await.map(|c| c.content) },
        )
        .await;

        let circuit = providers[0].circuit.as_ref().unwrap();
        assert_eq!(circuit.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn failover_diverts_to_a_different_provider_after_a_failure() {
        let providers = vec![
            handle("a", FakeProvider::failing_n_times("a", 1)),
            handle("b", FakeProvider::healthy("b")),
        ];
        let selector = Selector::new(SelectionStrategy::Failover);

        let result = call_with_retry(
            &providers,
            &selector,
            RetryConfig {
                max_retries: 2,
                retry_delay: Duration::ZERO,
            },
            Cancellation::none(),
            |p| async move { p.provider.generate("hi", &Default::default()).await.map(|c| c.content) },
        )
        .await
        .unwrap();

        assert_eq!(result, "b: hi");
    }

    #[tokio::test]
    async fn cancellation_aborts_the_retry_delay_promptly() {
        let providers = vec![handle("a", FakeProvider::unhealthy("a"))];
        let selector = Selector::new(SelectionStrategy::RoundRobin);
        let (source, cancel) = Cancellation::new();
        source.cancel();

        let result: Result<String, PoolError> = call_with_retry(
            &providers,
            &selector,
            RetryConfig {
                max_retries: 3,
                retry_delay: Duration::from_secs(60),
            },
            cancel,
            |p| async move { p.provider.generate("hi", &Default::default()).await.map(|c| c.content) },
        )
        .await;

        assert!(matches!(result, Err(PoolError::Cancelled)));
    }
}
