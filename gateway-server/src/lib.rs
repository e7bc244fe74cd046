//! HTTP server for the LLM gateway: config loading, request pipeline, and
//! the admin/health surface sit here; the routing, resiliency, and cache
//! core live in `gateway-core`.
//!
//! ## Architecture
//!
//! - `config` -- env + TOML configuration, startup validation
//! - `auth` -- single shared gateway key, constant-time comparison
//! - `server` -- `AppState` and the axum `Router` assembly
//! - `middleware` -- the eleven-step request pipeline
//! - `handlers` -- the terminal chat-completions route plus admin/health
//! - `request_context` -- per-request state threaded via extensions
//! - `metrics` -- request/cost counters backing `/metrics`
//! - `gateway_error` -- terminal error-to-HTTP mapping
//! - `shutdown` -- draining flag for graceful shutdown

pub mod auth;
pub mod config;
pub mod embedding_client;
pub mod gateway_error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod request_context;
pub mod server;
pub mod shutdown;

pub use server::create_server;
