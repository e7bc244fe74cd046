//! Per-provider latency tracking: a bounded ring buffer plus an EMA.
//!
//! Error samples are appended to the record log but never touch the EMA or
//! the percentile window -- a failing provider must not look fast.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

const DEFAULT_WINDOW: usize = 100;
const DEFAULT_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct LatencyRecord {
    pub ttfb_ms: u64,
    pub total_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct LatencyStats {
    pub provider: String,
    pub sample_count: usize,
    pub ema_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

/// Fixed-capacity ring buffer; overwrites the oldest entry once full.
#[derive(Debug)]
struct RingBuffer {
    data: Vec<u64>,
    capacity: usize,
    head: usize,
    len: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            capacity,
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, value: u64) {
        self.data[self.head] = value;
        self.head = (self.head + 1) % self.capacity;
        if self.len < self.capacity {
            self.len += 1;
        }
    }

    /// Deep-copies the live entries into a fresh sorted slice for percentile lookup.
    fn sorted_snapshot(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.len);
        if self.len < self.capacity {
            out.extend_from_slice(&self.data[..self.len]);
        } else {
            out.extend_from_slice(&self.data);
        }
        out.sort_unstable();
        out
    }
}

/// Nearest-rank percentile: `sorted[ceil(p/100 * n) - 1]`. Deterministic, no interpolation.
fn nearest_rank(sorted: &[u64], percentile: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

#[derive(Debug)]
struct ProviderWindow {
    window: RingBuffer,
    ema: Option<f64>,
    sample_count: usize,
    last_updated: Option<SystemTime>,
}

impl ProviderWindow {
    fn new(capacity: usize) -> Self {
        Self {
            window: RingBuffer::new(capacity),
            ema: None,
            sample_count: 0,
            last_updated: None,
        }
    }
}

pub struct LatencyTracker {
    window_size: usize,
    alpha: f64,
    providers: Mutex<HashMap<String, ProviderWindow>>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_WINDOW, DEFAULT_ALPHA)
    }

    pub fn with_config(window_size: usize, alpha: f64) -> Self {
        Self {
            window_size,
            alpha,
            providers: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, provider: &str, _model_id: &str, record: LatencyRecord) {
        let mut providers = self.providers.lock().unwrap();
        let entry = providers
            .entry(provider.to_string())
            .or_insert_with(|| ProviderWindow::new(self.window_size));

        entry.sample_count += 1;
        entry.last_updated = Some(SystemTime::now());

        if !record.success {
            // Error samples are logged but must never pollute EMA/percentiles.
            return;
        }

        entry.window.push(record.total_ms);
        entry.ema = Some(match entry.ema {
            None => record.total_ms as f64,
            Some(prev) => self.alpha * record.total_ms as f64 + (1.0 - self.alpha) * prev,
        });
    }

    pub fn get_ema(&self, provider: &str) -> Option<f64> {
        self.providers.lock().unwrap().get(provider)?.ema
    }

    pub fn get_percentile(&self, provider: &str, percentile: f64) -> Option<u64> {
        let providers = self.providers.lock().unwrap();
        let entry = providers.get(provider)?;
        if entry.window.len == 0 {
            return None;
        }
        Some(nearest_rank(&entry.window.sorted_snapshot(), percentile))
    }

    pub fn get_stats(&self, provider: &str) -> LatencyStats {
        let providers = self.providers.lock().unwrap();
        let Some(entry) = providers.get(provider) else {
            return LatencyStats {
                provider: provider.to_string(),
                ..Default::default()
            };
        };
        let sorted = entry.window.sorted_snapshot();
        LatencyStats {
            provider: provider.to_string(),
            sample_count: entry.sample_count,
            ema_ms: entry.ema.unwrap_or(0.0),
            p50_ms: nearest_rank(&sorted, 50.0),
            p95_ms: nearest_rank(&sorted, 95.0),
            p99_ms: nearest_rank(&sorted, 99.0),
            last_updated: entry.last_updated.map(chrono::DateTime::<chrono::Utc>::from),
        }
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}
