//! Shared scaffolding for the integration tests in this directory: an
//! in-memory `EmbeddingProvider`/`VectorStore` pair so the semantic cache
//! can run end to end without a live Qdrant or embeddings endpoint, plus a
//! builder that assembles an `AppState` and hands back a `TestServer`
//! wrapping the real middleware pipeline.
//!
//! One function integration tests call to get a ready-to-drive server, with
//! the network-dependent collaborators swapped for in-process doubles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;

use gateway_core::cache::{
    CacheError, CachedEntry, EmbeddingProvider, SemanticCache, SemanticCacheConfig, VectorMatch, VectorStore,
};
use gateway_core::models::EmbeddingVector;
use gateway_core::pricing::ModelCatalog;
use gateway_core::providers::test_support::ScriptedProvider;
use gateway_core::providers::Provider;
use gateway_core::registry::{ProviderRegistry, RegistryConfig};
use gateway_core::routing::RoutingEngine;
use gateway_core::rules::RoutingRule;
use gateway_core::selector::ModelSelector;
use gateway_core::token_bucket::TokenBucketRegistry;

use gateway_server::auth::AuthService;
use gateway_server::config::{CacheConfig, Config, ProviderSettings};
use gateway_server::metrics::MetricsRegistry;
use gateway_server::server::{build_router, AppState};
use gateway_server::shutdown::ShutdownGate;

pub const GATEWAY_KEY: &str = "integration-test-gateway-key-0123456789";

/// Always returns the same embedding, so every request for the same model
/// tag maps to the same point in vector space and the cosine-distance
/// threshold check in `SemanticCache::lookup` trivially passes.
pub struct FixedEmbedder;

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<EmbeddingVector, CacheError> {
        Ok(EmbeddingVector(vec![0.42, 0.17, 0.09]))
    }
}

/// Linear-scan vector store scoped by tag, written here since `cache.rs`'s
/// own in-module test double is private to that module.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: Mutex<Vec<(String, CachedEntry)>>,
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        tag: &str,
        _vector: EmbeddingVector,
        entry: CachedEntry,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        self.entries.lock().unwrap().push((tag.to_string(), entry));
        Ok(())
    }

    async fn search_by_tag(
        &self,
        tag: &str,
        _vector: &EmbeddingVector,
        _k: usize,
    ) -> Result<Vec<VectorMatch>, CacheError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, entry)| VectorMatch {
                entry: entry.clone(),
                cosine_distance: 0.0,
            })
            .collect())
    }
}

/// Builds a one-provider config with a long-enough gateway key and
/// generous-but-finite rate limits, then wires an `AppState` around a single
/// `ScriptedProvider` registered under `provider_name`. Tests that need
/// stricter limits or routing rules mutate the returned `Config` before
/// calling `router_from`.
pub fn test_config(provider_name: &str) -> Config {
    let mut config = Config::default();
    config.auth.gateway_key = GATEWAY_KEY.to_string();
    config.cache = CacheConfig {
        enabled: true,
        ..config.cache
    };
    config.providers.insert(
        provider_name.to_string(),
        ProviderSettings {
            rate_limit_capacity: 100.0,
            rate_limit_refill_per_sec: 50.0,
            ..ProviderSettings::default()
        },
    );
    config
}

pub fn with_routing_rules(mut config: Config, rules: Vec<RoutingRule>) -> Config {
    config.routing.rules = rules;
    config
}

/// Assembles `AppState` directly rather than going through
/// `gateway_server::create_server`, which constructs a real `reqwest`
/// embedding client and a real `qdrant-client` connection -- neither is
/// available in a test process.
pub fn test_state(config: Config, provider_name: &str, script: Vec<Result<gateway_core::models::ChatResponse, gateway_core::error::ProviderError>>) -> AppState {
    let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider::new(provider_name, script));
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    providers.insert(provider_name.to_string(), provider);

    let provider_names: Vec<&str> = config.providers.keys().map(String::as_str).collect();
    let registry = Arc::new(ProviderRegistry::new(
        &provider_names,
        RegistryConfig {
            failure_threshold: config.latency.circuit_failure_threshold,
            cooldown: config.latency.circuit_cooldown,
        },
    ));

    let selector = Arc::new(ModelSelector::new(RoutingEngine::new(ModelCatalog::with_default_models())));

    let rate_limiters = Arc::new(TokenBucketRegistry::new());
    for (name, settings) in &config.providers {
        rate_limiters
            .get_or_create(name, settings.rate_limit_capacity, settings.rate_limit_refill_per_sec)
            .unwrap();
    }

    let auth = Arc::new(AuthService::new(config.auth.gateway_key.clone()));
    let metrics = Arc::new(MetricsRegistry::new());
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FixedEmbedder);
    let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::default());
    let cache = Arc::new(SemanticCache::new(
        SemanticCacheConfig {
            enabled: config.cache.enabled,
            ttl: config.cache.ttl,
            cosine_distance_threshold: config.cache.cosine_distance_threshold,
        },
        embedder,
        vector_store,
    ));
    let shutdown = Arc::new(ShutdownGate::new());

    AppState {
        config: Arc::new(config),
        providers: Arc::new(providers),
        registry,
        selector,
        rate_limiters,
        auth,
        metrics,
        cache,
        shutdown,
    }
}

pub fn test_server(state: AppState) -> TestServer {
    TestServer::new(build_router(state)).unwrap()
}

pub fn bearer() -> String {
    format!("Bearer {GATEWAY_KEY}")
}
