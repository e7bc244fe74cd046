//! Candidate ranking: builds the set of (provider, model) candidates for a
//! request, applies rule-driven exclusions, and scores what remains by a
//! weighted blend of cost, latency, and capability fit.
//!
//! Usage:
//!
//! ```ignore
//! use gateway_core::routing::{RoutingEngine, RoutingRequest};
//! use gateway_core::pricing::ModelCatalog;
//! use gateway_core::registry::ProviderRegistry;
//!
//! let engine = RoutingEngine::new(ModelCatalog::with_default_models());
//! let ranked = engine.rank(&RoutingRequest {
//!     model: "gpt-4o".to_string(),
//!     streaming: false,
//!     ..Default::default()
//! }, &registry.get_provider_states(), &rules);
//! ```

use std::collections::HashMap;

use crate::pricing::ModelCatalog;
use crate::registry::ProviderState;
use crate::rules::{self, Candidate, RoutingRule};

const WEIGHT_COST: f64 = 0.3;
const WEIGHT_LATENCY: f64 = 0.4;
const WEIGHT_CAPABILITY: f64 = 0.3;
const PREFERENCE_BOOST_PER_PRIORITY: f64 = 0.05;
const PREFER_PROVIDER_BOOST: f64 = 0.1;

/// Per-request routing hint, set from the `x-routing-strategy` header.
/// Reweights the one balanced scoring formula per request rather than
/// dispatching between separate routing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingStrategy {
    #[default]
    Balanced,
    Cost,
    Latency,
    Capability,
}

#[derive(Debug, Clone)]
pub struct UnknownRoutingStrategy(String);

impl std::fmt::Display for UnknownRoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown routing strategy: {}", self.0)
    }
}

impl std::error::Error for UnknownRoutingStrategy {}

impl std::str::FromStr for RoutingStrategy {
    type Err = UnknownRoutingStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "cost" => Ok(Self::Cost),
            "latency" => Ok(Self::Latency),
            "capability" => Ok(Self::Capability),
            other => Err(UnknownRoutingStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingRequest {
    pub model: String,
    pub streaming: bool,
    pub required_capabilities: Vec<String>,
    pub strategy: RoutingStrategy,
    pub prefer_provider: Option<String>,
    pub max_latency_ms: Option<u64>,
    pub max_cost: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RankedProvider {
    pub provider: String,
    pub model: String,
    pub score: f64,
    pub matched_rules: Vec<String>,
}

pub struct RoutingEngine {
    catalog: ModelCatalog,
}

impl RoutingEngine {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self { catalog }
    }

    /// Exposes the underlying catalog's pricing lookup so callers outside
    /// the ranking path (cost telemetry) can price a completed request
    /// without duplicating the (provider, model) pricing table.
    pub fn pricing(&self, provider: &str, model: &str) -> Option<crate::pricing::ModelPricing> {
        self.catalog.pricing(provider, model)
    }

    /// Builds candidates for `request.model` across every provider the catalog
    /// knows about, applies exclusions from matched rules, scores and sorts
    /// the survivors descending by score. An empty result means no candidate
    /// satisfied the request's capability requirements or survived exclusion.
    pub fn rank(
        &self,
        request: &RoutingRequest,
        states: &[ProviderState],
        active_rules: &[RoutingRule],
    ) -> Vec<RankedProvider> {
        let states_by_provider: HashMap<&str, &ProviderState> = states
            .iter()
            .map(|s| (s.provider.as_str(), s))
            .collect();

        let has_cost_hint = request.max_cost.is_some() || request.strategy == RoutingStrategy::Cost;
        let has_latency_hint = request.max_latency_ms.is_some() || request.strategy == RoutingStrategy::Latency;

        let mut raw: Vec<(String, String, f64, Vec<String>, f64)> = Vec::new();

        for (provider, model) in self.catalog.all_candidates() {
            if model != request.model {
                continue;
            }
            let capabilities = self.catalog.capabilities(provider, model);
            if !request
                .required_capabilities
                .iter()
                .all(|c| capabilities.contains(c))
            {
                continue;
            }
            if request.streaming && !capabilities.iter().any(|c| c == "streaming") {
                continue;
            }

            let pricing = match self.catalog.pricing(provider, model) {
                Some(p) => p,
                None => continue,
            };
            if let Some(max_cost) = request.max_cost {
                if pricing.average_per_1k() > max_cost {
                    continue;
                }
            }
            let state = states_by_provider.get(provider).copied();
            if let Some(max_latency) = request.max_latency_ms {
                match state.map(|s| s.latency.p95_ms) {
                    Some(p95) if p95 > 0 && p95 <= max_latency => {}
                    _ => continue,
                }
            }
            let candidate = Candidate {
                provider,
                model,
                avg_cost_per_1k: pricing.average_per_1k(),
                capabilities: &capabilities,
            };

            let capability_score = if request.required_capabilities.is_empty() {
                (capabilities.len() as f64 / 5.0).min(1.0)
            } else {
                let matched_count = request
                    .required_capabilities
                    .iter()
                    .filter(|c| capabilities.contains(c))
                    .count();
                matched_count as f64 / request.required_capabilities.len() as f64
            };

            let mut matched = Vec::new();
            let mut preference_boost = if request.prefer_provider.as_deref() == Some(provider) {
                PREFER_PROVIDER_BOOST
            } else {
                0.0
            };
            let mut is_excluded = false;
            for rule in active_rules {
                if !rules::evaluate(&rule.condition, &candidate, state) {
                    continue;
                }
                matched.push(rule.id.clone());
                if rule.preferred_providers.iter().any(|p| p == provider) {
                    preference_boost += rule.priority as f64 * PREFERENCE_BOOST_PER_PRIORITY;
                }
                if rules::is_relevant(&rule.condition, has_cost_hint, has_latency_hint)
                    && rule.exclude_providers.iter().any(|p| p == provider)
                {
                    is_excluded = true;
                }
            }
            if is_excluded {
                continue;
            }

            raw.push((
                provider.to_string(),
                model.to_string(),
                preference_boost,
                matched,
                capability_score,
            ));
        }

        if raw.is_empty() {
            return Vec::new();
        }

        let costs: Vec<f64> = raw
            .iter()
            .map(|(p, m, _, _, _)| self.catalog.pricing(p, m).unwrap().average_per_1k())
            .collect();
        let latencies: Vec<f64> = raw
            .iter()
            .map(|(p, _, _, _, _)| {
                states_by_provider
                    .get(p.as_str())
                    .map(|s| s.latency.ema_ms)
                    .unwrap_or(0.0)
            })
            .collect();

        let cost_scores = normalize_inverted(&costs);
        let latency_scores = normalize_inverted(&latencies);

        let (weight_cost, weight_latency, weight_capability) = match request.strategy {
            RoutingStrategy::Balanced => (WEIGHT_COST, WEIGHT_LATENCY, WEIGHT_CAPABILITY),
            RoutingStrategy::Cost => (1.0, 0.0, 0.0),
            RoutingStrategy::Latency => (0.0, 1.0, 0.0),
            RoutingStrategy::Capability => (0.0, 0.0, 1.0),
        };

        let mut ranked: Vec<RankedProvider> = raw
            .into_iter()
            .enumerate()
            .map(|(i, (provider, model, preference_boost, matched_rules, capability_score))| {
                let score = weight_cost * cost_scores[i]
                    + weight_latency * latency_scores[i]
                    + weight_capability * capability_score
                    + preference_boost;
                RankedProvider {
                    provider,
                    model,
                    score,
                    matched_rules,
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        ranked
    }
}

/// Min-max normalize to `[0, 1]`; all-equal input normalizes to `0.0` for
/// every element rather than dividing by zero.
fn normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

/// Same as [`normalize`] but inverted, for metrics where lower is better
/// (cost, latency): the cheapest/fastest candidate scores `1.0`.
fn normalize_inverted(values: &[f64]) -> Vec<f64> {
    normalize(values).into_iter().map(|v| 1.0 - v).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::LatencyStats;
    use crate::registry::CircuitState;
    use crate::rules::Condition;

    fn state(provider: &str, ema_ms: f64) -> ProviderState {
        state_with_p95(provider, ema_ms, 0)
    }

    fn state_with_p95(provider: &str, ema_ms: f64, p95_ms: u64) -> ProviderState {
        ProviderState {
            provider: provider.to_string(),
            available: true,
            rate_limit_remaining: None,
            rate_limit_reset_at: None,
            latency: LatencyStats {
                provider: provider.to_string(),
                ema_ms,
                p95_ms,
                ..Default::default()
            },
            last_error_at: None,
            consecutive_errors: 0,
            circuit_state: CircuitState::Closed,
        }
    }

    #[test]
    fn ranks_cheaper_faster_provider_higher() {
        let mut catalog = ModelCatalog::new();
        catalog.insert(
            "cheap",
            "shared-model",
            crate::pricing::ModelPricing {
                input_per_1k: 0.0001,
                output_per_1k: 0.0002,
            },
            &["chat"],
        );
        catalog.insert(
            "pricey",
            "shared-model",
            crate::pricing::ModelPricing {
                input_per_1k: 0.01,
                output_per_1k: 0.02,
            },
            &["chat"],
        );
        let engine = RoutingEngine::new(catalog);
        let states = vec![state("cheap", 100.0), state("pricey", 100.0)];
        let ranked = engine.rank(
            &RoutingRequest {
                model: "shared-model".to_string(),
                streaming: false,
                required_capabilities: vec![],
                ..Default::default()
            },
            &states,
            &[],
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].provider, "cheap");
    }

    #[test]
    fn equal_candidates_tie_with_zero_normalized_component() {
        let mut catalog = ModelCatalog::new();
        for provider in ["a", "b"] {
            catalog.insert(
                provider,
                "shared-model",
                crate::pricing::ModelPricing {
                    input_per_1k: 0.001,
                    output_per_1k: 0.002,
                },
                &["chat"],
            );
        }
        let engine = RoutingEngine::new(catalog);
        let states = vec![state("a", 50.0), state("b", 50.0)];
        let ranked = engine.rank(
            &RoutingRequest {
                model: "shared-model".to_string(),
                streaming: false,
                required_capabilities: vec![],
                ..Default::default()
            },
            &states,
            &[],
        );
        assert!((ranked[0].score - ranked[1].score).abs() < f64::EPSILON);
    }

    #[test]
    fn excludes_provider_named_in_matched_rule() {
        let mut catalog = ModelCatalog::new();
        for provider in ["allowed", "blocked"] {
            catalog.insert(
                provider,
                "shared-model",
                crate::pricing::ModelPricing {
                    input_per_1k: 0.001,
                    output_per_1k: 0.002,
                },
                &["chat"],
            );
        }
        let engine = RoutingEngine::new(catalog);
        let states = vec![state("allowed", 50.0), state("blocked", 50.0)];
        let rule = RoutingRule {
            id: "exclude-blocked".to_string(),
            priority: 1,
            condition: Condition::Capability {
                required: vec!["chat".to_string()],
            },
            preferred_providers: vec![],
            exclude_providers: vec!["blocked".to_string()],
        };
        let ranked = engine.rank(
            &RoutingRequest {
                model: "shared-model".to_string(),
                streaming: false,
                required_capabilities: vec![],
                ..Default::default()
            },
            &states,
            &[rule],
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].provider, "allowed");
    }

    #[test]
    fn cost_strategy_ignores_latency_entirely() {
        let mut catalog = ModelCatalog::new();
        catalog.insert(
            "cheap-slow",
            "shared-model",
            crate::pricing::ModelPricing {
                input_per_1k: 0.0001,
                output_per_1k: 0.0002,
            },
            &["chat"],
        );
        catalog.insert(
            "pricey-fast",
            "shared-model",
            crate::pricing::ModelPricing {
                input_per_1k: 0.01,
                output_per_1k: 0.02,
            },
            &["chat"],
        );
        let engine = RoutingEngine::new(catalog);
        let states = vec![state("cheap-slow", 900.0), state("pricey-fast", 10.0)];
        let ranked = engine.rank(
            &RoutingRequest {
                model: "shared-model".to_string(),
                strategy: RoutingStrategy::Cost,
                ..Default::default()
            },
            &states,
            &[],
        );
        assert_eq!(ranked[0].provider, "cheap-slow");
    }

    #[test]
    fn prefer_provider_adds_a_flat_boost_over_a_cheaper_rival() {
        let mut catalog = ModelCatalog::new();
        catalog.insert(
            "cheaper",
            "shared-model",
            crate::pricing::ModelPricing {
                input_per_1k: 0.0001,
                output_per_1k: 0.0002,
            },
            &["chat"],
        );
        catalog.insert(
            "preferred",
            "shared-model",
            crate::pricing::ModelPricing {
                input_per_1k: 0.0001,
                output_per_1k: 0.0002,
            },
            &["chat"],
        );
        let engine = RoutingEngine::new(catalog);
        let states = vec![state("cheaper", 100.0), state("preferred", 100.0)];
        let ranked = engine.rank(
            &RoutingRequest {
                model: "shared-model".to_string(),
                prefer_provider: Some("preferred".to_string()),
                ..Default::default()
            },
            &states,
            &[],
        );
        assert_eq!(ranked[0].provider, "preferred");
    }

    #[test]
    fn max_cost_hint_drops_candidates_priced_above_it() {
        let mut catalog = ModelCatalog::new();
        catalog.insert(
            "cheap",
            "shared-model",
            crate::pricing::ModelPricing {
                input_per_1k: 0.0001,
                output_per_1k: 0.0002,
            },
            &["chat"],
        );
        catalog.insert(
            "pricey",
            "shared-model",
            crate::pricing::ModelPricing {
                input_per_1k: 0.01,
                output_per_1k: 0.02,
            },
            &["chat"],
        );
        let engine = RoutingEngine::new(catalog);
        let states = vec![state("cheap", 100.0), state("pricey", 100.0)];
        let ranked = engine.rank(
            &RoutingRequest {
                model: "shared-model".to_string(),
                max_cost: Some(0.001),
                ..Default::default()
            },
            &states,
            &[],
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].provider, "cheap");
    }

    #[test]
    fn max_latency_hint_drops_a_provider_with_no_recorded_state() {
        let mut catalog = ModelCatalog::new();
        catalog.insert(
            "known",
            "shared-model",
            crate::pricing::ModelPricing {
                input_per_1k: 0.001,
                output_per_1k: 0.002,
            },
            &["chat"],
        );
        catalog.insert(
            "unknown",
            "shared-model",
            crate::pricing::ModelPricing {
                input_per_1k: 0.001,
                output_per_1k: 0.002,
            },
            &["chat"],
        );
        let engine = RoutingEngine::new(catalog);
        let states = vec![state_with_p95("known", 50.0, 200)];
        let ranked = engine.rank(
            &RoutingRequest {
                model: "shared-model".to_string(),
                max_latency_ms: Some(500),
                ..Default::default()
            },
            &states,
            &[],
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].provider, "known");
    }

    #[test]
    fn missing_required_capability_filters_candidate_out() {
        let mut catalog = ModelCatalog::new();
        catalog.insert(
            "basic",
            "shared-model",
            crate::pricing::ModelPricing {
                input_per_1k: 0.001,
                output_per_1k: 0.002,
            },
            &["chat"],
        );
        let engine = RoutingEngine::new(catalog);
        let ranked = engine.rank(
            &RoutingRequest {
                model: "shared-model".to_string(),
                streaming: false,
                required_capabilities: vec!["function-calling".to_string()],
                ..Default::default()
            },
            &[],
            &[],
        );
        assert!(ranked.is_empty());
    }
}
