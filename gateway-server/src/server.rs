//! Router assembly: wires the eleven-step middleware pipeline (see
//! `middleware`) in front of the chat-completions handler. `/health` and
//! `/ready` stay unguarded for load balancer probes; `/metrics`,
//! `/metrics/costs`, and `/admin/providers` require the same bearer auth
//! as the chat route.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;

use std::collections::HashMap;

use gateway_core::cache::{EmbeddingProvider, SemanticCache, SemanticCacheConfig, VectorStore};
use gateway_core::pricing::ModelCatalog;
use gateway_core::providers::Provider;
use gateway_core::qdrant_store::QdrantVectorStore;
use gateway_core::registry::{ProviderRegistry, RegistryConfig};
use gateway_core::routing::RoutingEngine;
use gateway_core::selector::ModelSelector;
use gateway_core::token_bucket::TokenBucketRegistry;

use crate::auth::AuthService;
use crate::config::Config;
use crate::embedding_client::HttpEmbeddingProvider;
use crate::handlers;
use crate::metrics::MetricsRegistry;
use crate::middleware;
use crate::shutdown::ShutdownGate;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub providers: Arc<HashMap<String, Arc<dyn Provider>>>,
    pub registry: Arc<ProviderRegistry>,
    pub selector: Arc<ModelSelector>,
    pub rate_limiters: Arc<TokenBucketRegistry>,
    pub auth: Arc<AuthService>,
    pub metrics: Arc<MetricsRegistry>,
    pub cache: Arc<SemanticCache<Arc<dyn EmbeddingProvider>, Arc<dyn VectorStore>>>,
    pub shutdown: Arc<ShutdownGate>,
}

/// Builds the router plus the shutdown handle the caller signals once a
/// termination signal arrives (see `main.rs`'s `shutdown_signal`).
pub async fn create_server(
    config: Config,
    providers: HashMap<String, Arc<dyn Provider>>,
) -> anyhow::Result<(Router, Arc<ShutdownGate>)> {
    config.validate()?;

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbeddingProvider::new(
        config.cache.embedding_endpoint.clone(),
        config.cache.embedding_model.clone(),
    ));
    let vector_store: Arc<dyn VectorStore> = Arc::new(QdrantVectorStore::new(
        &config.cache.qdrant_url,
        config.cache.qdrant_collection.clone(),
    )?);

    let provider_names: Vec<&str> = config.providers.keys().map(String::as_str).collect();
    let registry = Arc::new(ProviderRegistry::new(
        &provider_names,
        RegistryConfig {
            failure_threshold: config.latency.circuit_failure_threshold,
            cooldown: config.latency.circuit_cooldown,
        },
    ));

    let selector = Arc::new(ModelSelector::new(RoutingEngine::new(
        ModelCatalog::with_default_models(),
    )));

    let rate_limiters = Arc::new(TokenBucketRegistry::new());
    for (name, settings) in &config.providers {
        rate_limiters.get_or_create(
            name,
            settings.rate_limit_capacity,
            settings.rate_limit_refill_per_sec,
        )?;
    }

    let auth = Arc::new(AuthService::new(config.auth.gateway_key.clone()));
    let metrics = Arc::new(MetricsRegistry::new());
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

    let state = AppState {
        config: Arc::new(config),
        providers: Arc::new(providers),
        registry,
        selector,
        rate_limiters,
        auth,
        metrics,
        cache,
        shutdown,
    };

    let shutdown_handle = state.shutdown.clone();
    Ok((build_router(state), shutdown_handle))
}

/// Wires the eleven-step pipeline onto `/v1/chat/completions` in front of an
/// already-constructed [`AppState`]. Split out from [`create_server`] so
/// tests can exercise the full pipeline against in-memory collaborators
/// (a scripted [`Provider`], an in-memory cache) without a live Qdrant or
/// embeddings endpoint.
pub fn build_router(state: AppState) -> Router {
    let chat_pipeline = ServiceBuilder::new()
        .layer(axum::middleware::from_fn(middleware::tracing_middleware))
        .layer(axum::middleware::from_fn(middleware::request_logger_middleware))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::shutdown_gate_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::body_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::parse_validate_middleware))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::deadline_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::smart_router_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::semantic_cache_middleware,
        ));

    let admin_auth = axum::middleware::from_fn_with_state(state.clone(), middleware::auth_middleware);

    let app = Router::new()
        .route("/v1/chat/completions", post(handlers::chat::chat_completions).layer(chat_pipeline))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics).layer(admin_auth.clone()))
        .route("/metrics/costs", get(handlers::metrics_costs).layer(admin_auth.clone()))
        .route("/admin/providers", get(handlers::list_providers).layer(admin_auth))
        .with_state(state);

    app
}
