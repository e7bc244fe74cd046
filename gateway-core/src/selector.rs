//! Model selector: the thin orchestrator above the rules engine, the
//! provider registry, and the fallback handler.

use crate::fallback::{run_with_fallback, AttemptRecord, FallbackError, FallbackOptions};
use crate::registry::ProviderRegistry;
use crate::routing::{RankedProvider, RoutingEngine, RoutingRequest};
use crate::rules::RoutingRule;

#[derive(Debug, Clone)]
pub enum SelectorError {
    NoProviderAvailable,
}

pub struct ModelSelector {
    engine: RoutingEngine,
}

impl ModelSelector {
    pub fn new(engine: RoutingEngine) -> Self {
        Self { engine }
    }

    /// Pricing for a (provider, model) pair, for cost telemetry computed
    /// after a completion rather than during ranking.
    pub fn pricing(&self, provider: &str, model: &str) -> Option<crate::pricing::ModelPricing> {
        self.engine.pricing(provider, model)
    }

    /// Snapshots the registry, ranks candidates, filters by availability
    /// (claiming the half-open probe explicitly when relevant) and by
    /// remaining rate limit, then breaks score ties by ascending latency
    /// EMA. Returns the single best provider or `NoProviderAvailable`.
    pub fn select_provider(
        &self,
        request: &RoutingRequest,
        registry: &ProviderRegistry,
        rules: &[RoutingRule],
    ) -> Result<RankedProvider, SelectorError> {
        let ranked = self.select_ranked(request, registry, rules);
        ranked.into_iter().next().ok_or(SelectorError::NoProviderAvailable)
    }

    /// Same ranking as `select_provider`, but returns the whole ordered
    /// list for the fallback handler to walk.
    pub fn select_ranked(
        &self,
        request: &RoutingRequest,
        registry: &ProviderRegistry,
        rules: &[RoutingRule],
    ) -> Vec<RankedProvider> {
        let states = registry.get_provider_states();
        let mut ranked = self.engine.rank(request, &states, rules);

        ranked.retain(|candidate| {
            if !registry.is_available(&candidate.provider) {
                return false;
            }
            let state = states.iter().find(|s| s.provider == candidate.provider);
            let half_open = matches!(
                state.map(|s| s.circuit_state),
                Some(crate::registry::CircuitState::HalfOpen)
            );
            if half_open && !registry.try_claim_probe(&candidate.provider) {
                return false;
            }
            if let Some(state) = state {
                if let Some(remaining) = state.rate_limit_remaining {
                    if remaining == 0 {
                        return false;
                    }
                }
            }
            true
        });

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap()
                .then_with(|| {
                    let ema_a = registry.latency_tracker().get_ema(&a.provider).unwrap_or(0.0);
                    let ema_b = registry.latency_tracker().get_ema(&b.provider).unwrap_or(0.0);
                    ema_a.partial_cmp(&ema_b).unwrap()
                })
        });
        ranked
    }

    /// Feeds the ranked list into the fallback handler. `execute` performs
    /// the terminal upstream call and is responsible for nothing beyond the
    /// call itself; registry reporting happens here so circuit-breaker
    /// state updates regardless of which layer called in.
    pub async fn select_with_fallback<T, E, F, Fut>(
        &self,
        request: &RoutingRequest,
        registry: &ProviderRegistry,
        rules: &[RoutingRule],
        deadline: &tokio_util::sync::CancellationToken,
        options: &FallbackOptions,
        execute: F,
    ) -> Result<(T, Vec<AttemptRecord>), FallbackError>
    where
        F: FnMut(String, tokio_util::sync::CancellationToken) -> Fut,
        Fut: std::future::Future<Output = Result<(T, u64), E>>,
        E: Into<crate::error::ProviderError> + Clone,
    {
        let ranked = self.select_ranked(request, registry, rules);
        let providers: Vec<String> = ranked.into_iter().map(|r| r.provider).collect();
        let model = request.model.clone();
        let registry_ref = registry;
        let mut execute = execute;

        run_with_fallback(&providers, deadline, options, move |provider, token| {
            let model = model.clone();
            let fut = execute(provider.clone(), token);
            async move {
                match fut.await {
                    Ok((value, latency_ms)) => {
                        registry_ref.report_success(&provider, &model, latency_ms);
                        Ok(value)
                    }
                    Err(err) => {
                        let provider_err: crate::error::ProviderError = err.clone().into();
                        registry_ref.report_error(&provider, &model, &provider_err);
                        Err(err)
                    }
                }
            }
        })
        .await
    }
}
