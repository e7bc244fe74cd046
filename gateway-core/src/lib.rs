//! Routing, resiliency, and semantic caching primitives for an LLM gateway.
//!
//! This crate has no HTTP server in it -- it is the part of the gateway
//! that decides which provider a request should go to, retries and fails
//! over when one misbehaves, tracks per-provider health, and answers
//! "have we already served something like this" before the server ever
//! calls an upstream. `gateway-server` wires these pieces into an axum
//! middleware pipeline.
//!
//! ## Selecting and calling a provider
//!
//! ```ignore
//! use gateway_core::pricing::ModelCatalog;
//! use gateway_core::registry::{ProviderRegistry, RegistryConfig};
//! use gateway_core::routing::{RoutingEngine, RoutingRequest};
//! use gateway_core::selector::ModelSelector;
//!
//! let registry = ProviderRegistry::new(&["openai", "anthropic"], RegistryConfig::default());
//! let selector = ModelSelector::new(RoutingEngine::new(ModelCatalog::with_default_models()));
//!
//! let request = RoutingRequest {
//!     model: "gpt-4o".to_string(),
//!     streaming: false,
//!     required_capabilities: vec![],
//! };
//! let selected = selector.select_provider(&request, &registry, &[])?;
//! # Ok::<(), gateway_core::selector::SelectorError>(())
//! ```

pub mod cache;
pub mod error;
pub mod fallback;
pub mod latency;
pub mod models;
pub mod pricing;
pub mod providers;
pub mod qdrant_store;
pub mod registry;
pub mod retry;
pub mod routing;
pub mod rules;
pub mod selector;
pub mod token_bucket;

pub use error::{ClientError, ProviderError, Result};
pub use models::{ChatRequest, ChatResponse, Message, Role};
