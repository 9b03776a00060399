//! Per-provider runtime record (C3 data model)

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use provider_core::LlmProvider;
use tokio::sync::RwLock;

use crate::circuit::CircuitBreaker;
use crate::metrics::Metrics;

/// A provider registered with the pool, plus the live counters the selector,
/// health monitor, and retry engine all read and update.
pub struct ProviderHandle {
    /// Stable name used for diagnostics, status reporting, and the factory's
    /// name→config mapping.
    pub name: String,

    pub provider: Arc<dyn LlmProvider>,

    /// Updated by the health monitor (C3) and, temporarily, by the retry
    /// engine's Failover demotion (C7). Guarded by a read-write lock since
    /// the health monitor writes rarely but the selector reads on every call.
    healthy: RwLock<bool>,

    /// Incremented at request start, decremented at completion, on every
    /// exit path including cancellation and panics (invariant 1 in §8).
    active_loads: AtomicI64,

    pub weight: u32,
    pub cost_per_unit: f64,
    pub max_concurrency: u32,

    pub metrics: Metrics,
    pub circuit: Option<CircuitBreaker>,

    last_check: RwLock<Option<Instant>>,
}

/// Construction parameters for a [`ProviderHandle`], split out so the factory
/// and pool builder can assemble one without threading every field through a
/// long positional constructor.
pub struct ProviderHandleConfig {
    pub name: String,
    pub provider: Arc<dyn LlmProvider>,
    pub weight: u32,
    pub cost_per_unit: f64,
    pub max_concurrency: u32,
    pub circuit_enabled: bool,
}

impl ProviderHandleConfig {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
            weight: 1,
            cost_per_unit: 0.001,
            max_concurrency: 16,
            circuit_enabled: true,
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn cost_per_unit(mut self, cost_per_unit: f64) -> Self {
        self.cost_per_unit = cost_per_unit;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn circuit_enabled(mut self, circuit_enabled: bool) -> Self {
        self.circuit_enabled = circuit_enabled;
        self
    }
}

impl ProviderHandle {
    pub fn new(config: ProviderHandleConfig) -> Self {
        Self {
            name: config.name,
            provider: config.provider,
            healthy: RwLock::new(true),
            active_loads: AtomicI64::new(0),
            weight: config.weight.max(1),
            cost_per_unit: config.cost_per_unit,
            max_concurrency: config.max_concurrency.max(1),
            metrics: Metrics::new(),
            circuit: config.circuit_enabled.then(CircuitBreaker::default),
            last_check: RwLock::new(None),
        }
    }

    pub async fn is_healthy(&self) -> bool {
        *self.healthy.read().await
    }

    pub async fn set_healthy(&self, healthy: bool) {
        *self.healthy.write().await = healthy;
    }

    pub async fn touch_last_check(&self) {
        *self.last_check.write().await = Some(Instant::now());
    }

    pub async fn last_check(&self) -> Option<Instant> {
        *self.last_check.read().await
    }

    pub fn active_loads(&self) -> i64 {
        self.active_loads.load(Ordering::Acquire)
    }

    /// Increment the in-flight counter, returning a guard that decrements it
    /// on drop — covers every exit path, including an early `?` return or a
    /// panic unwinding through the retry engine.
    pub fn enter(&self) -> LoadGuard<'_> {
        self.active_loads.fetch_add(1, Ordering::Release);
        LoadGuard { handle: self }
    }

    /// Eligibility check applied by the selector, in the order §4.6 requires.
    pub async fn is_eligible(&self) -> bool {
        if !self.is_healthy().await {
            return false;
        }
        if let Some(circuit) = &self.circuit {
            if !circuit.can_request().await {
                return false;
            }
        }
        self.active_loads() < i64::from(self.max_concurrency)
    }
}

/// RAII guard decrementing `active_loads` on drop.
pub struct LoadGuard<'a> {
    handle: &'a ProviderHandle,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.handle.active_loads.fetch_sub(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeProvider;

    fn handle(name: &str) -> ProviderHandle {
        ProviderHandle::new(ProviderHandleConfig::new(
            name,
            Arc::new(FakeProvider::healthy(name)),
        ))
    }

    #[tokio::test]
    async fn load_guard_decrements_on_drop_even_when_scope_exits_early() {
        let h = handle("p1");
        assert_eq!(h.active_loads(), 0);
        {
            let _guard = h.enter();
            assert_eq!(h.active_loads(), 1);
        }
        assert_eq!(h.active_loads(), 0);
    }

    #[tokio::test]
    async fn is_eligible_false_once_max_concurrency_reached() {
        let h = ProviderHandle::new(
            ProviderHandleConfig::new("p1", Arc::new(FakeProvider::healthy("p1")))
                .max_concurrency(1),
        );
        assert!(h.is_eligible().await);
        let _guard = h.enter();
        assert!(!h.is_eligible().await);
    }

    #[tokio::test]
    async fn is_eligible_false_when_unhealthy() {
        let h = handle("p1");
        h.set_healthy(false).await;
        assert!(!h.is_eligible().await);
    }
}
