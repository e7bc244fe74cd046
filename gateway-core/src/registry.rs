//! Provider registry: per-provider circuit breaker state, rate-limit
//! counters, and the health snapshot the routing engine reads.
//!
//! The half-open probe claim is a separate, explicit mutation
//! ([`ProviderRegistry::try_claim_probe`]) rather than a side effect hidden
//! inside a read -- the upstream circuit breaker this was adapted from
//! flipped the probe flag inside `can_execute`, a query that looked pure
//! but wasn't. The model selector calls `try_claim_probe` itself, after
//! ranking, never implicitly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::latency::{LatencyRecord, LatencyStats, LatencyTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct ProviderEntry {
    consecutive_errors: u32,
    last_error_at: Option<Instant>,
    circuit_opened_at: Option<Instant>,
    probe_in_flight: bool,
    rate_limit_remaining: Option<u64>,
    rate_limit_reset_at: Option<Instant>,
}

impl Default for ProviderEntry {
    fn default() -> Self {
        Self {
            consecutive_errors: 0,
            last_error_at: None,
            circuit_opened_at: None,
            probe_in_flight: false,
            rate_limit_remaining: None,
            rate_limit_reset_at: None,
        }
    }
}

/// Immutable snapshot returned to the routing engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderState {
    pub provider: String,
    pub available: bool,
    pub rate_limit_remaining: Option<u64>,
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
    pub latency: LatencyStats,
    pub last_error_at: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub circuit_state: CircuitState,
}

pub struct ProviderRegistry {
    config: RegistryConfig,
    entries: Mutex<HashMap<String, ProviderEntry>>,
    latency: LatencyTracker,
}

impl ProviderRegistry {
    pub fn new(providers: &[&str], config: RegistryConfig) -> Self {
        let mut entries = HashMap::new();
        for provider in providers {
            entries.insert(provider.to_string(), ProviderEntry::default());
        }
        Self {
            config,
            entries: Mutex::new(entries),
            latency: LatencyTracker::new(),
        }
    }

    pub fn with_latency_tracker(
        providers: &[&str],
        config: RegistryConfig,
        latency: LatencyTracker,
    ) -> Self {
        let mut entries = HashMap::new();
        for provider in providers {
            entries.insert(provider.to_string(), ProviderEntry::default());
        }
        Self {
            config,
            entries: Mutex::new(entries),
            latency,
        }
    }

    fn circuit_state_locked(&self, entry: &ProviderEntry) -> CircuitState {
        match entry.circuit_opened_at {
            None => CircuitState::Closed,
            Some(opened_at) => {
                if opened_at.elapsed() < self.config.cooldown {
                    CircuitState::Open
                } else {
                    CircuitState::HalfOpen
                }
            }
        }
    }

    /// Pure read: does not claim the half-open probe. During half-open a
    /// caller must follow up with [`Self::try_claim_probe`] before treating
    /// the provider as usable.
    pub fn is_available(&self, provider: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get(provider) else {
            return false;
        };
        match self.circuit_state_locked(entry) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => !entry.probe_in_flight,
        }
    }

    /// Explicit mutation: atomically claims the single half-open probe slot.
    /// Returns `true` only for the caller that wins the compare-and-set.
    /// A no-op (returns `false`) outside of half-open.
    pub fn try_claim_probe(&self, provider: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(provider) else {
            return false;
        };
        if self.circuit_state_locked(entry) != CircuitState::HalfOpen {
            return false;
        }
        if entry.probe_in_flight {
            return false;
        }
        entry.probe_in_flight = true;
        true
    }

    pub fn report_success(&self, provider: &str, model_id: &str, latency_ms: u64) {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(provider) {
                entry.consecutive_errors = 0;
                entry.circuit_opened_at = None;
                entry.probe_in_flight = false;
            }
        }
        self.latency.record(
            provider,
            model_id,
            LatencyRecord {
                ttfb_ms: latency_ms,
                total_ms: latency_ms,
                success: true,
            },
        );
    }

    pub fn report_error(&self, provider: &str, model_id: &str, _error: &ProviderError) {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(provider) {
                entry.consecutive_errors += 1;
                entry.last_error_at = Some(Instant::now());
                if entry.consecutive_errors >= self.config.failure_threshold
                    && entry.circuit_opened_at.is_none()
                {
                    entry.circuit_opened_at = Some(Instant::now());
                    tracing::warn!(provider, "circuit breaker opened");
                } else if self.circuit_state_locked(entry) == CircuitState::HalfOpen
                    && entry.probe_in_flight
                {
                    // a failed probe reopens the circuit with a fresh opened-at
                    entry.circuit_opened_at = Some(Instant::now());
                    tracing::warn!(provider, "half-open probe failed, circuit reopened");
                }
                entry.probe_in_flight = false;
            }
        }
        self.latency.record(
            provider,
            model_id,
            LatencyRecord {
                ttfb_ms: 0,
                total_ms: 0,
                success: false,
            },
        );
    }

    pub fn update_rate_limit(&self, provider: &str, remaining: u64, reset_in: Duration) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(provider) {
            entry.rate_limit_remaining = Some(remaining);
            entry.rate_limit_reset_at = Some(Instant::now() + reset_in);
        }
    }

    pub fn get_provider_states(&self) -> Vec<ProviderState> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .map(|(provider, entry)| ProviderState {
                provider: provider.clone(),
                available: self.is_available_locked(entry),
                rate_limit_remaining: entry.rate_limit_remaining,
                rate_limit_reset_at: entry
                    .rate_limit_reset_at
                    .map(instant_to_chrono_approx),
                latency: self.latency.get_stats(provider),
                last_error_at: entry.last_error_at.map(instant_to_chrono_approx),
                consecutive_errors: entry.consecutive_errors,
                circuit_state: self.circuit_state_locked(entry),
            })
            .collect()
    }

    fn is_available_locked(&self, entry: &ProviderEntry) -> bool {
        match self.circuit_state_locked(entry) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => !entry.probe_in_flight,
        }
    }

    pub fn latency_tracker(&self) -> &LatencyTracker {
        &self.latency
    }
}

/// `Instant` has no epoch; approximate a wall-clock timestamp for snapshot
/// serialization by anchoring against "now" at read time. Good enough for
/// telemetry display, never used for invariant enforcement.
fn instant_to_chrono_approx(instant: Instant) -> DateTime<Utc> {
    let now_instant = Instant::now();
    let now_utc = Utc::now();
    if instant <= now_instant {
        now_utc - chrono::Duration::from_std(now_instant - instant).unwrap_or_default()
    } else {
        now_utc + chrono::Duration::from_std(instant - now_instant).unwrap_or_default()
    }
}
