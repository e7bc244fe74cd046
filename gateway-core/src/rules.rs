//! Routing rule conditions and the pure evaluator that tests one rule
//! against one candidate.

use serde::{Deserialize, Serialize};

use crate::registry::ProviderState;

/// A tagged condition variant. Exhaustively matched by [`evaluate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Cost { max_per_1k: f64 },
    Latency { max_ms: u64 },
    Capability { required: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    pub priority: u32,
    pub condition: Condition,
    #[serde(default)]
    pub preferred_providers: Vec<String>,
    #[serde(default)]
    pub exclude_providers: Vec<String>,
}

/// A (provider, model) pair under consideration, prior to ranking.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub avg_cost_per_1k: f64,
    pub capabilities: &'a [String],
}

/// Pure dispatch over the condition variant. `state` carries the provider's
/// observed p95 latency for the latency variant; unknown latency fails
/// conservative (does not match).
pub fn evaluate(condition: &Condition, candidate: &Candidate, state: Option<&ProviderState>) -> bool {
    match condition {
        Condition::Cost { max_per_1k } => candidate.avg_cost_per_1k <= *max_per_1k,
        Condition::Latency { max_ms } => match state.map(|s| s.latency.p95_ms) {
            Some(p95) if p95 > 0 => p95 <= *max_ms,
            _ => false,
        },
        Condition::Capability { required } => required
            .iter()
            .all(|cap| candidate.capabilities.iter().any(|c| c == cap)),
    }
}

/// A cost rule is only "relevant" to exclusion when the request carries a
/// cost budget or explicitly asked for the cost strategy; likewise latency.
/// Capability rules are always relevant.
pub fn is_relevant(condition: &Condition, has_cost_hint: bool, has_latency_hint: bool) -> bool {
    match condition {
        Condition::Cost { .. } => has_cost_hint,
        Condition::Latency { .. } => has_latency_hint,
        Condition::Capability { .. } => true,
    }
}
