//! Bounded per-target response-time windows

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::Clock;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LatencySample {
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
}

/// Fixed-capacity, insertion-ordered latency samples per target.
/// Once a target's ring is full the oldest sample is evicted first.
pub struct MetricsWindow {
    samples: Arc<RwLock<HashMap<String, VecDeque<LatencySample>>>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl MetricsWindow {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            samples: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Append a sample stamped with the current time
    pub async fn record(&self, target: &str, latency_ms: f64) {
        let sample = LatencySample {
            target: target.to_string(),
            timestamp: self.clock.now(),
            latency_ms,
        };

        let mut samples = self.samples.write().await;
        let ring = samples
            .entry(target.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(sample);

        debug!("Recorded {:.2}ms for {}, window size: {}", latency_ms, target, ring.len());
    }

    /// Mean latency over samples in `[now - window_minutes, now]`
    pub async fn average(&self, target: &str, window_minutes: u32) -> Option<f64> {
        let now = self.clock.now();
        let cutoff = now - Duration::minutes(i64::from(window_minutes));

        let samples = self.samples.read().await;
        let ring = samples.get(target)?;

        let (sum, count) = ring
            .iter()
            .filter(|s| s.timestamp >= cutoff && s.timestamp <= now)
            .fold((0.0, 0usize), |(sum, count), s| (sum + s.latency_ms, count + 1));

        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    /// Copy of a target's samples, oldest first
    pub async fn samples(&self, target: &str) -> Vec<LatencySample> {
        let samples = self.samples.read().await;
        samples
            .get(target)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, target: &str) -> usize {
        let samples = self.samples.read().await;
        samples.get(target).map(VecDeque::len).unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn window(capacity: usize) -> (MetricsWindow, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MetricsWindow::new(capacity, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_average_of_recent_samples() {
        let (metrics, _) = window(100);

        for latency in [10.0, 20.0, 30.0] {
            metrics.record("api", latency).await;
        }

        assert_eq!(metrics.average("api", 5).await, Some(20.0));
    }

    #[tokio::test]
    async fn test_average_absent_when_empty_or_stale() {
        let (metrics, clock) = window(100);
        assert_eq!(metrics.average("api", 5).await, None);

        metrics.record("api", 42.0).await;
        clock.advance(Duration::minutes(6));
        assert_eq!(metrics.average("api", 5).await, None);
    }

    #[tokio::test]
    async fn test_average_only_counts_window() {
        let (metrics, clock) = window(100);

        metrics.record("api", 1000.0).await;
        clock.advance(Duration::minutes(10));
        metrics.record("api", 10.0).await;
        clock.advance(Duration::minutes(1));
        metrics.record("api", 30.0).await;

        assert_eq!(metrics.average("api", 5).await, Some(20.0));
        assert_eq!(metrics.average("api", 60).await, Some(1040.0 / 3.0));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let (metrics, _) = window(3);

        for latency in [1.0, 2.0, 3.0, 4.0] {
            metrics.record("api", latency).await;
        }

        let samples = metrics.samples("api").await;
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].latency_ms, 2.0);
        assert_eq!(samples[2].latency_ms, 4.0);
        assert_eq!(metrics.len("api").await, metrics.capacity());
    }

    #[tokio::test]
    async fn test_targets_have_separate_windows() {
        let (metrics, _) = window(2);

        metrics.record("a", 1.0).await;
        metrics.record("b", 2.0).await;
        metrics.record("b", 4.0).await;

        assert_eq!(metrics.average("a", 5).await, Some(1.0));
        assert_eq!(metrics.average("b", 5).await, Some(3.0));
        assert!(metrics.samples("c").await.is_empty());
    }
}
