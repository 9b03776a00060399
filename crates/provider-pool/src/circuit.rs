//! Per-provider circuit breaker (C4)

use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_ts: Option<Instant>,
}

/// CLOSED -> OPEN -> HALF_OPEN -> {CLOSED | OPEN}, guarded by a single lock
/// since every transition reads and writes the same fields together.
pub struct CircuitBreaker {
    fail_threshold: u32,
    recovery_timeout: Duration,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(fail_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            fail_threshold,
            recovery_timeout,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_ts: None,
            }),
        }
    }

    /// Whether a request may be attempted right now. In OPEN, checks whether
    /// `recovery_timeout` has elapsed since the last failure; if so, promotes
    /// to HALF_OPEN and allows exactly this probe through.
    pub async fn can_request(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_ts
                    .map(|ts| ts.elapsed() >= self.recovery_timeout)
                    .unwrap_or(false);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures = 0;
        inner.state = CircuitState::Closed;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.last_failure_ts = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.fail_threshold {
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }
}

impl Default for CircuitBreaker {
    /// Default thresholds per §4.4: 5 consecutive failures opens the circuit,
    /// 30 seconds to attempt recovery.
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..2 {
            cb.record_failure().await;
            assert_eq!(cb.state().await, CircuitState::Closed);
        }
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.can_request().await);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failure_count() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_to_half_open_after_recovery_timeout_then_closed_on_success() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(30));
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.can_request().await);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_request().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn any_failure_in_half_open_returns_to_open() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(30));
        cb.record_failure().await;
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_request().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }
}
