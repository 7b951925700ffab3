//! Cycle duration histogram for /stats/latency.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Milliseconds, 1ms to 1h at 3 significant figures.
const MAX_TRACKED_MS: u64 = 3_600_000;

pub struct LatencyStats {
    inner: Mutex<Option<hdrhistogram::Histogram<u64>>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, MAX_TRACKED_MS, 3).ok();
        Self { inner: Mutex::new(histogram) }
    }

    /// Durations beyond the tracked range are saturated, not dropped.
    pub fn record(&self, d: Duration) {
        let ms = (d.as_millis().min(u128::from(MAX_TRACKED_MS)) as u64).max(1);
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(h) = guard.as_mut() {
                let _ = h.record(ms);
            }
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let empty = LatencySummary { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None, max_ms: None };
        let Ok(guard) = self.inner.lock() else {
            return empty;
        };
        match guard.as_ref() {
            Some(h) if h.len() > 0 => LatencySummary {
                samples: h.len(),
                p50_ms: Some(h.value_at_quantile(0.5)),
                p95_ms: Some(h.value_at_quantile(0.95)),
                p99_ms: Some(h.value_at_quantile(0.99)),
                max_ms: Some(h.max()),
            },
            _ => empty,
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
