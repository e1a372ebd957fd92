//! In-memory latency histograms for external provider calls, one per
//! provider. Every provider adapter records, the API reads.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use hdrhistogram::Histogram;
use serde::Serialize;

/// 1ms to 10min, values in milliseconds.
const MAX_MS: u64 = 600_000;

/// Percentiles for one provider. Empty histograms report `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderLatency {
    pub provider: String,
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

/// Shared latency stats keyed by provider name.
#[derive(Default)]
pub struct LatencyStats {
    by_provider: DashMap<&'static str, Histogram<u64>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, provider: &'static str, d: Duration) {
        let ms = d.as_millis().clamp(1, MAX_MS as u128) as u64;
        if !self.by_provider.contains_key(provider) {
            // 3 significant figures.
            let Ok(histogram) = Histogram::new_with_bounds(1, MAX_MS, 3) else {
                return;
            };
            self.by_provider.entry(provider).or_insert(histogram);
        }
        if let Some(mut h) = self.by_provider.get_mut(provider) {
            let _ = h.record(ms);
        }
    }

    pub fn record_since(&self, provider: &'static str, started: Instant) {
        self.record(provider, started.elapsed());
    }

    /// One entry per provider that has been called, sorted by name.
    pub fn snapshot(&self) -> Vec<ProviderLatency> {
        let mut out: Vec<ProviderLatency> = self
            .by_provider
            .iter()
            .map(|entry| {
                let h = entry.value();
                let at = |q: f64| (h.len() > 0).then(|| h.value_at_quantile(q));
                ProviderLatency {
                    provider: entry.key().to_string(),
                    samples: h.len(),
                    p50_ms: at(0.5),
                    p95_ms: at(0.95),
                    p99_ms: at(0.99),
                }
            })
            .collect();
        out.sort_by(|a, b| a.provider.cmp(&b.provider));
        out
    }
}
