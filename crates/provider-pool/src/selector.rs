//! Selector (C6)
//!
//! Strategy-parameterised choice of an eligible provider. Grounded on the
//! teacher's `ProviderChain::next_provider`, which advanced a monotonic
//! atomic counter mod the candidate count; generalised here into a small
//! strategy enum covering every selection policy §4.6 names.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use provider_core::error::PoolError;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::status::ProviderHandle;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    RoundRobin,
    Random,
    LeastLoad,
    Failover,
    WeightedRoundRobin,
    LatencyBased,
    CostOptimised,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// Chooses among a pool's providers. Holds only the state a strategy needs
/// across calls (the round-robin counter); eligibility and metrics live on
/// each `ProviderHandle` itself so the selector stays stateless otherwise.
pub struct Selector {
    strategy: SelectionStrategy,
    /// Monotonically increasing; advanced on every Round-Robin/Weighted-
    /// Round-Robin selection. Matches the teacher's `ProviderChain` counter
    /// exactly (an `AtomicU64` advanced with `fetch_add`).
    counter: AtomicU64,
}

impl Selector {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            counter: AtomicU64::new(0),
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Pick one eligible provider out of `providers`, which must be iterated
    /// in pool-construction (stable insertion) order — that order is the
    /// tie-break and the Failover priority order.
    pub async fn select(
        &self,
        providers: &[Arc<ProviderHandle>],
    ) -> Result<Arc<ProviderHandle>, PoolError> {
        self.select_excluding(providers, &[]).await
    }

    /// Same as [`select`](Self::select) but skipping any handle whose name
    /// appears in `excluded` — used by the retry engine's Failover demotion
    /// so a provider that just failed is not immediately re-picked.
    pub async fn select_excluding(
        &self,
        providers: &[Arc<ProviderHandle>],
        excluded: &[String],
    ) -> Result<Arc<ProviderHandle>, PoolError> {
        let mut eligible = Vec::with_capacity(providers.len());
        for handle in providers {
            if excluded.iter().any(|name| name == &handle.name) {
                continue;
            }
            if handle.is_eligible().await {
                eligible.push(Arc::clone(handle));
            }
        }

        if eligible.is_empty() {
            return Err(PoolError::NoHealthyProviders);
        }

        let chosen = match self.strategy {
            SelectionStrategy::RoundRobin => {
                let idx = self.counter.fetch_add(1, Ordering::Relaxed) as usize % eligible.len();
                eligible[idx].clone()
            }
            SelectionStrategy::Random => {
                let idx = rand::rng().random_range(0..eligible.len());
                eligible[idx].clone()
            }
            SelectionStrategy::LeastLoad => eligible
                .iter()
                .min_by_key(|h| h.active_loads())
                .expect("eligible is non-empty")
                .clone(),
            SelectionStrategy::Failover => eligible[0].clone(),
            SelectionStrategy::WeightedRoundRobin => self.weighted_pick(&eligible),
            SelectionStrategy::LatencyBased => self.latency_pick(&eligible).await,
            SelectionStrategy::CostOptimised => Self::cost_pick(&eligible),
        };

        Ok(chosen)
    }

    /// A counter modulo the total weight selects the provider whose
    /// cumulative weight interval contains the index.
    fn weighted_pick(&self, eligible: &[Arc<ProviderHandle>]) -> Arc<ProviderHandle> {
        let total_weight: u64 = eligible.iter().map(|h| u64::from(h.weight)).sum();
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % total_weight.max(1);

        let mut cumulative = 0u64;
        for handle in eligible {
            cumulative += u64::from(handle.weight);
            if idx < cumulative {
                return Arc::clone(handle);
            }
        }
        // Unreachable given the modulo above, but stable-order fallback keeps
        // this infallible rather than panicking on a rounding edge case.
        eligible[0].clone()
    }

    /// Minimum P95 latency (falling back to the running average when no
    /// percentile has been computed yet), jittered by a small random factor
    /// in [0.9, 1.1] to avoid every caller herding onto the same provider.
    async fn latency_pick(&self, eligible: &[Arc<ProviderHandle>]) -> Arc<ProviderHandle> {
        let mut best: Option<(Arc<ProviderHandle>, f64)> = None;
        for handle in eligible {
            let latency = handle.metrics.p95_or_average().await;
            let jitter = rand::rng().random_range(0.9..=1.1);
            let jittered = latency * jitter;
            if best.as_ref().is_none_or(|(_, best_latency)| jittered < *best_latency) {
                best = Some((Arc::clone(handle), jittered));
            }
        }
        best.expect("eligible is non-empty").0
    }

    /// Minimum `cost_per_unit / success_rate`.
    fn cost_pick(eligible: &[Arc<ProviderHandle>]) -> Arc<ProviderHandle> {
        eligible
            .iter()
            .min_by(|a, b| {
                let cost_a = a.cost_per_unit / a.metrics.success_rate();
                let cost_b = b.cost_per_unit / b.metrics.success_rate();
                cost_a.partial_cmp(&cost_b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("eligible is non-empty")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ProviderHandleConfig;
    use crate::test_support::FakeProvider;

    fn handles(names: &[&str]) -> Vec<Arc<ProviderHandle>> {
        names
            .iter()
            .map(|name| {
                Arc::new(ProviderHandle::new(ProviderHandleConfig::new(
                    *name,
                    Arc::new(FakeProvider::healthy(*name)),
                )))
            })
            .collect()
    }

    #[tokio::test]
    async fn round_robin_distributes_n_requests_bijectively_over_n_providers() {
        let providers = handles(&["a", "b", "c"]);
        let selector = Selector::new(SelectionStrategy::RoundRobin);

        let mut picked = Vec::new();
        for _ in 0..3 {
            picked.push(selector.select(&providers).await.unwrap().name.clone());
        }
        picked.sort();
        assert_eq!(picked, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failover_always_picks_lowest_indexed_eligible_provider() {
        let providers = handles(&["a", "b", "c"]);
        let selector = Selector::new(SelectionStrategy::Failover);
        assert_eq!(selector.select(&providers).await.unwrap().name, "a");

        providers[0].set_healthy(false).await;
        assert_eq!(selector.select(&providers).await.unwrap().name, "b");
    }

    #[tokio::test]
    async fn least_load_prefers_provider_with_fewest_active_loads() {
        let providers = handles(&["a", "b"]);
        let _guard = providers[0].enter();
        let selector = Selector::new(SelectionStrategy::LeastLoad);
        assert_eq!(selector.select(&providers).await.unwrap().name, "b");
    }

    #[tokio::test]
    async fn no_eligible_providers_returns_no_healthy_providers_error() {
        let providers = handles(&["a"]);
        providers[0].set_healthy(false).await;
        let selector = Selector::new(SelectionStrategy::RoundRobin);
        assert!(matches!(
            selector.select(&providers).await,
            Err(PoolError::NoHealthyProviders)
        ));
    }

    #[tokio::test]
    async fn weighted_round_robin_converges_to_weight_ratio() {
        let providers = vec![
            Arc::new(ProviderHandle::new(
                ProviderHandleConfig::new("a", Arc::new(FakeProvider::healthy("a"))).weight(1),
            )),
            Arc::new(ProviderHandle::new(
                ProviderHandleConfig::new("b", Arc::new(FakeProvider::healthy("b"))).weight(3),
            )),
        ];
        let selector = Selector::new(SelectionStrategy::WeightedRoundRobin);

        let mut counts = std::collections::HashMap::new();
        for _ in 0..400 {
            let name = selector.select(&providers).await.unwrap().name.clone();
            *counts.entry(name).or_insert(0) += 1;
        }
        let ratio = *counts.get("b").unwrap() as f64 / *counts.get("a").unwrap() as f64;
        assert!((ratio - 3.0).abs() < 0.2, "ratio was {ratio}");
    }

    #[tokio::test]
    async fn cost_optimised_prefers_lower_effective_cost() {
        let cheap = Arc::new(ProviderHandle::new(
            ProviderHandleConfig::new("cheap", Arc::new(FakeProvider::healthy("cheap")))
                .cost_per_unit(0.001),
        ));
        let pricey = Arc::new(ProviderHandle::new(
            ProviderHandleConfig::new("pricey", Arc::new(FakeProvider::healthy("pricey")))
                .cost_per_unit(0.1),
        ));
        let providers = vec![cheap, pricey];
        let selector = Selector::new(SelectionStrategy::CostOptimised);
        assert_eq!(selector.select(&providers).await.unwrap().name, "cheap");
    }

    #[tokio::test]
    async fn select_excluding_skips_named_providers() {
        let providers = handles(&["a", "b"]);
        let selector = Selector::new(SelectionStrategy::Failover);
        let picked = selector
            .select_excluding(&providers, &["a".to_string()])
            .await
            .unwrap();
        assert_eq!(picked.name, "b");
    }
}
