//! # provider-pool
//!
//! Health monitoring, circuit breaking, metrics, selection, and retry/
//! failover routing over a set of `provider-core::LlmProvider` backends,
//! plus the pool facade that implements that same trait itself.
//!
//! ## Architecture
//!
//! ```text
//! Pool Facade (C8)
//!   -> Retry/Failover Engine (C7)
//!        -> Selector (C6, consults Health Monitor / Circuit Breaker / Metrics)
//!             -> Provider (C1, from provider-core or provider-runtime)
//! ```
//!
//! `TrackedProvider` (C11) wraps any `LlmProvider`, including a `Pool` itself,
//! to add usage accounting without changing call outcomes.

pub mod circuit;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod selector;
pub mod status;
pub mod tracked;

#[cfg(test)]
pub mod test_support;

pub use circuit::{CircuitBreaker, CircuitState};
pub use health::HealthMonitor;
pub use metrics::{Metrics, MetricsSnapshot};
pub use pool::{Pool, PoolBuilder};
pub use retry::{call_with_retry, RetryConfig};
pub use selector::{SelectionStrategy, Selector};
pub use status::{ProviderHandle, ProviderHandleConfig};
pub use tracked::{NullUsageSink, TrackedProvider, UsageSink};
