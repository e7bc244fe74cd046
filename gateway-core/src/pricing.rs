//! Static model pricing table used by the routing engine's cost metric.
//!
//! Grounded on the per-provider cost table the gateway handler computed
//! inline for cost telemetry; here it is promoted to a first-class lookup
//! shared by routing and cost reporting.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPricing {
    pub fn average_per_1k(&self) -> f64 {
        (self.input_per_1k + self.output_per_1k) / 2.0
    }
}

/// A (provider, model) -> pricing table plus the set of capabilities each
/// model advertises, keyed the same way candidates are built in `routing.rs`.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    pricing: HashMap<(String, String), ModelPricing>,
    capabilities: HashMap<(String, String), Vec<String>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self {
            pricing: HashMap::new(),
            capabilities: HashMap::new(),
        }
    }

    pub fn with_default_models() -> Self {
        let mut catalog = Self::new();
        catalog.insert(
            "openai",
            "gpt-4o",
            ModelPricing {
                input_per_1k: 0.005,
                output_per_1k: 0.015,
            },
            &["chat", "streaming", "function-calling"],
        );
        catalog.insert(
            "openai",
            "gpt-4o-mini",
            ModelPricing {
                input_per_1k: 0.00015,
                output_per_1k: 0.0006,
            },
            &["chat", "streaming"],
        );
        catalog.insert(
            "anthropic",
            "claude-3-5-sonnet",
            ModelPricing {
                input_per_1k: 0.003,
                output_per_1k: 0.015,
            },
            &["chat", "streaming", "function-calling"],
        );
        catalog.insert(
            "google",
            "gemini-1.5-pro",
            ModelPricing {
                input_per_1k: 0.00125,
                output_per_1k: 0.005,
            },
            &["chat", "streaming"],
        );
        catalog
    }

    pub fn insert(
        &mut self,
        provider: &str,
        model: &str,
        pricing: ModelPricing,
        capabilities: &[&str],
    ) {
        let key = (provider.to_string(), model.to_string());
        self.pricing.insert(key.clone(), pricing);
        self.capabilities.insert(
            key,
            capabilities.iter().map(|c| c.to_string()).collect(),
        );
    }

    pub fn pricing(&self, provider: &str, model: &str) -> Option<ModelPricing> {
        self.pricing
            .get(&(provider.to_string(), model.to_string()))
            .copied()
    }

    pub fn capabilities(&self, provider: &str, model: &str) -> Vec<String> {
        self.capabilities
            .get(&(provider.to_string(), model.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// All (provider, model) pairs known to the catalog for a given provider.
    pub fn models_for(&self, provider: &str) -> Vec<String> {
        self.pricing
            .keys()
            .filter(|(p, _)| p == provider)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn all_candidates(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pricing
            .keys()
            .map(|(p, m)| (p.as_str(), m.as_str()))
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::with_default_models()
    }
}
