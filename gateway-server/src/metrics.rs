//! Request counters and cost accounting backing `/metrics` and
//! `/metrics/costs`. Deliberately simple: total/per-status/per-provider
//! counters plus a running cost sum, not a full time-series store -- that
//! lives in whatever scrapes this gateway's `/metrics` endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Default)]
struct ProviderCounters {
    requests: AtomicU64,
    errors: AtomicU64,
    cache_hits: AtomicU64,
    cost_micros: AtomicU64,
}

#[derive(Default)]
pub struct MetricsRegistry {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    total_cache_hits: AtomicU64,
    total_cache_misses: AtomicU64,
    providers: Mutex<HashMap<String, ProviderCounters>>,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_cache_hits: u64,
    pub total_cache_misses: u64,
    pub providers: HashMap<String, ProviderSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct ProviderSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Serialize)]
pub struct CostSnapshot {
    pub total_cost_usd: f64,
    pub by_provider: HashMap<String, f64>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, provider: &str, is_error: bool, cost_usd: f64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        let mut providers = self.providers.lock().unwrap();
        let counters = providers.entry(provider.to_string()).or_default();
        counters.requests.fetch_add(1, Ordering::Relaxed);
        if is_error {
            counters.errors.fetch_add(1, Ordering::Relaxed);
        }
        counters
            .cost_micros
            .fetch_add((cost_usd * 1_000_000.0).round() as u64, Ordering::Relaxed);
    }

    pub fn record_cache_outcome(&self, provider: &str, hit: bool) {
        if hit {
            self.total_cache_hits.fetch_add(1, Ordering::Relaxed);
            let providers = self.providers.lock().unwrap();
            if let Some(counters) = providers.get(provider) {
                counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            self.total_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let providers = self
            .providers
            .lock()
            .unwrap()
            .iter()
            .map(|(name, counters)| {
                (
                    name.clone(),
                    ProviderSnapshot {
                        requests: counters.requests.load(Ordering::Relaxed),
                        errors: counters.errors.load(Ordering::Relaxed),
                        cache_hits: counters.cache_hits.load(Ordering::Relaxed),
                        cost_usd: counters.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            total_cache_hits: self.total_cache_hits.load(Ordering::Relaxed),
            total_cache_misses: self.total_cache_misses.load(Ordering::Relaxed),
            providers,
        }
    }

    pub fn cost_snapshot(&self) -> CostSnapshot {
        let providers = self.providers.lock().unwrap();
        let by_provider: HashMap<String, f64> = providers
            .iter()
            .map(|(name, counters)| {
                (
                    name.clone(),
                    counters.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
                )
            })
            .collect();
        let total_cost_usd = by_provider.values().sum();
        CostSnapshot {
            total_cost_usd,
            by_provider,
        }
    }
}
