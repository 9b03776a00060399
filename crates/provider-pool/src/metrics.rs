//! Per-provider latency history, percentiles, and success rate (C5)

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

const HISTORY_LEN: usize = 100;
const RECOMPUTE_EVERY: u64 = 10;

#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub success_rate: f64,
}

struct History {
    /// Circular buffer of the last `HISTORY_LEN` latency samples.
    samples: Vec<f64>,
    next_slot: usize,
    filled: usize,
    p95: f64,
    p99: f64,
    /// Running sum of every latency ever recorded, for `avg_latency_ms`.
    /// Lives here (rather than as a separate atomic) so the read-modify-write
    /// is serialised by the same lock that guards the rest of the history.
    cumulative_latency_ms: f64,
}

impl History {
    fn new() -> Self {
        Self {
            samples: vec![0.0; HISTORY_LEN],
            next_slot: 0,
            filled: 0,
            p95: 0.0,
            p99: 0.0,
            cumulative_latency_ms: 0.0,
        }
    }

    fn push(&mut self, latency_ms: f64) {
        self.samples[self.next_slot] = latency_ms;
        self.next_slot = (self.next_slot + 1) % HISTORY_LEN;
        self.filled = (self.filled + 1).min(HISTORY_LEN);
        self.cumulative_latency_ms += latency_ms;
    }

    fn recompute_percentiles(&mut self) {
        if self.filled == 0 {
            return;
        }
        let mut snapshot: Vec<f64> = self.samples[..self.filled].to_vec();
        snapshot.sort_by(|a, b| a.partial_cmp(b).unwrap());
        self.p95 = percentile(&snapshot, 0.95);
        self.p99 = percentile(&snapshot, 0.99);
    }
}

/// Index `snapshot` at the ceiling of `q * n`, clamped into range, per §4.5.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    let idx = ((q * n as f64).ceil() as usize).clamp(1, n) - 1;
    sorted[idx]
}

/// Thread-safe per-provider metrics record. Totals are plain atomics; the
/// latency history, cumulative latency, and derived percentiles share one
/// lock since they're always read/written together.
pub struct Metrics {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    history: RwLock<History>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            history: RwLock::new(History::new()),
        }
    }

    /// Record the outcome of one request.
    pub async fn record_request(&self, success: bool, latency_ms: f64) {
        let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;
        if success {
            self.success.fetch_add(1, Ordering::AcqRel);
        } else {
            self.failure.fetch_add(1, Ordering::AcqRel);
        }

        let mut history = self.history.write().await;
        history.push(latency_ms);
        if total % RECOMPUTE_EVERY == 0 {
            history.recompute_percentiles();
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// `success / total`, optimistically `1.0` when nothing has been recorded yet.
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        self.success.load(Ordering::Acquire) as f64 / total as f64
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total();
        let history = self.history.read().await;
        MetricsSnapshot {
            total,
            success: self.success.load(Ordering::Acquire),
            failure: self.failure.load(Ordering::Acquire),
            avg_latency_ms: if total == 0 {
                0.0
            } else {
                history.cumulative_latency_ms / total as f64
            },
            p95_latency_ms: history.p95,
            p99_latency_ms: history.p99,
            success_rate: self.success_rate(),
        }
    }

    /// P95 latency for selection purposes, falling back to the running
    /// average when fewer than `RECOMPUTE_EVERY` samples have been recorded.
    pub async fn p95_or_average(&self) -> f64 {
        let history = self.history.read().await;
        if history.p95 > 0.0 {
            history.p95
        } else {
            let total = self.total();
            if total == 0 {
                0.0
            } else {
                history.cumulative_latency_ms / total as f64
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_rate_is_optimistic_before_any_samples() {
        let m = Metrics::new();
        assert_eq!(m.success_rate(), 1.0);
    }

    #[tokio::test]
    async fn success_rate_reflects_recorded_outcomes() {
        let m = Metrics::new();
        m.record_request(true, 10.0).await;
        m.record_request(true, 10.0).await;
        m.record_request(false, 10.0).await;
        assert!((m.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn percentiles_recompute_every_ten_records() {
        let m = Metrics::new();
        for i in 1..=9 {
            m.record_request(true, i as f64).await;
        }
        assert_eq!(m.snapshot().await.p95_latency_ms, 0.0);
        m.record_request(true, 10.0).await;
        let snap = m.snapshot().await;
        assert!(snap.p95_latency_ms > 0.0);
        assert!(snap.p99_latency_ms >= snap.p95_latency_ms);
    }

    #[test]
    fn percentile_indexes_at_ceiling_of_q_times_n() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(percentile(&sorted, 0.95), 10.0);
        assert_eq!(percentile(&sorted, 0.5), 5.0);
    }

    #[tokio::test]
    async fn concurrent_record_request_calls_lose_no_cumulative_latency() {
        let m = Metrics::new();
        let futures = (0..50).map(|_| m.record_request(true, 1.0));
        futures::future::join_all(futures).await;
        assert_eq!(m.snapshot().await.avg_latency_ms, 1.0);
    }
}
