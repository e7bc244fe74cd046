//! The eleven-step request pipeline in front of `/v1/chat/completions`:
//!
//! 1. `tracing_middleware` -- opens the per-request tracing span.
//! 2. `request_logger_middleware` -- structured start/end log lines.
//! 3. `shutdown_gate_middleware` -- 503 once the process has started draining.
//! 4. `auth_middleware` -- constant-time bearer check against the shared gateway key.
//! 5. `body_limit_middleware` -- rejects declared-oversize bodies early via `Content-Length`.
//! 6. `parse_validate_middleware` -- buffers and parses the body once, stores it on the request context.
//! 7. `rate_limit_middleware` -- token-bucket admission for the best-guess provider.
//! 8. `deadline_middleware` -- establishes the per-request cancellation token.
//! 9. `smart_router_middleware` -- ranks providers and records the pick for logging/cache tagging.
//! 10. `semantic_cache_middleware` -- short-circuits on a cache hit, tags misses for the handler to populate.
//!
//! Each stage is a plain `axum::middleware::from_fn[_with_state]` function
//! rather than a `tower::Layer`.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use gateway_core::models::ChatRequest;
use gateway_core::routing::{RoutingRequest, RoutingStrategy};

use crate::gateway_error::GatewayError;
use crate::request_context::RequestContext;
use crate::server::AppState;

const MIN_DEADLINE: Duration = Duration::from_secs(1);
const MAX_DEADLINE: Duration = Duration::from_secs(120);
const KNOWN_PROVIDERS: [&str; 3] = ["openai", "anthropic", "google"];

/// Builds the routing hint axis of a [`RoutingRequest`] from the
/// `x-routing-*` headers. An unparseable or out-of-enum value is treated as
/// absent rather than rejected -- these are optimization hints, not
/// contract, so a malformed header degrades to the default behavior instead
/// of failing the request.
fn routing_hints_from_headers(headers: &axum::http::HeaderMap) -> (RoutingStrategy, Option<String>, Option<u64>, Option<f64>) {
    let strategy = headers
        .get("x-routing-strategy")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or_default();
    let prefer_provider = headers
        .get("x-routing-prefer-provider")
        .and_then(|value| value.to_str().ok())
        .filter(|value| KNOWN_PROVIDERS.contains(value))
        .map(str::to_string);
    let max_latency_ms = headers
        .get("x-routing-max-latency-ms")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0);
    let max_cost = headers
        .get("x-routing-max-cost")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| *value > 0.0);
    (strategy, prefer_provider, max_latency_ms, max_cost)
}

fn error_response(status: StatusCode, error_type: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "message": message, "type": error_type, "code": status.as_u16() } })),
    )
        .into_response()
}

pub async fn tracing_middleware(req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!("request", request_id = %request_id, path = %req.uri().path());
    let mut req = req;
    req.extensions_mut()
        .insert(RequestContext::with_request_id(request_id.clone()));

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}

pub async fn request_logger_middleware(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    tracing::info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request handled"
    );
    response
}

pub async fn shutdown_gate_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if state.shutdown.is_draining() {
        return GatewayError::Draining.into_response();
    }
    next.run(req).await
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match state.auth.authenticate(header) {
        Ok(()) => next.run(req).await,
        Err(err) => GatewayError::Auth {
            message: err.to_string(),
        }
        .into_response(),
    }
}

pub async fn body_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let declared_len = req
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    if let Some(len) = declared_len {
        if len > state.config.server.max_body_bytes {
            return GatewayError::PayloadTooLarge.into_response();
        }
    }
    next.run(req).await
}

pub async fn parse_validate_middleware(req: Request<Body>, next: Next) -> Response {
    let (mut parts, body) = req.into_parts();
    let bytes = match to_bytes(body, 10 * 1024 * 1024).await {
        Ok(bytes) => bytes,
        Err(_) => return GatewayError::PayloadTooLarge.into_response(),
    };

    let chat_request: ChatRequest = match serde_json::from_slice(&bytes) {
        Ok(request) => request,
        Err(err) => {
            return GatewayError::InvalidRequest {
                message: format!("malformed request body: {err}"),
            }
            .into_response()
        }
    };

    if chat_request.model.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request_error", "model must not be empty");
    }
    if chat_request.messages.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "messages must not be empty",
        );
    }

    parts.extensions.insert(chat_request);
    let req = Request::from_parts(parts, Body::empty());
    next.run(req).await
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(chat_request) = req.extensions().get::<ChatRequest>() else {
        return next.run(req).await;
    };

    let routing_request = RoutingRequest {
        model: chat_request.model.clone(),
        streaming: chat_request.stream.unwrap_or(false),
        ..RoutingRequest::default()
    };
    let ranked = state
        .selector
        .select_ranked(&routing_request, &state.registry, &state.config.routing.rules);

    // Best-guess provider ahead of the smart-router's own ranking; this
    // bucket is consulted, never a circuit-breaker signal, per the
    // resolved open question that rate limiting and breaker state are
    // independent admission checks.
    if let Some(candidate) = ranked.first() {
        let settings = state.config.providers.get(&candidate.provider);
        let (capacity, refill) = settings
            .map(|s| (s.rate_limit_capacity, s.rate_limit_refill_per_sec))
            .unwrap_or((60.0, 1.0));
        if let Ok(bucket) = state
            .rate_limiters
            .get_or_create(&candidate.provider, capacity, refill)
        {
            if !bucket.try_acquire() {
                return GatewayError::RateLimit {
                    retry_after_secs: bucket.retry_after(),
                    limit: bucket.max_tokens() as u64,
                    remaining: bucket.remaining(),
                }
                .into_response();
            }
        }
    }

    next.run(req).await
}

pub async fn deadline_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let header_ms = req
        .headers()
        .get("X-Timeout-Ms")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let timeout = match header_ms {
        Some(ms) => Duration::from_millis(ms).clamp(MIN_DEADLINE, MAX_DEADLINE),
        None => state.config.server.default_timeout,
    };

    let token = CancellationToken::new();
    let timer_token = token.clone();
    let guard = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        timer_token.cancel();
    });

    let mut req = req;
    if let Some(context) = req.extensions_mut().get_mut::<RequestContext>() {
        context.deadline = Some(token);
    }

    let response = next.run(req).await;
    guard.abort();
    response
}

pub async fn smart_router_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(chat_request) = req.extensions().get::<ChatRequest>().cloned() else {
        return next.run(req).await;
    };

    let (strategy, prefer_provider, max_latency_ms, max_cost) = routing_hints_from_headers(req.headers());
    let routing_request = RoutingRequest {
        model: chat_request.model.clone(),
        streaming: chat_request.stream.unwrap_or(false),
        required_capabilities: vec![],
        strategy,
        prefer_provider,
        max_latency_ms,
        max_cost,
    };
    let ranked = state
        .selector
        .select_ranked(&routing_request, &state.registry, &state.config.routing.rules);

    let Some(top) = ranked.into_iter().next() else {
        return GatewayError::NoProviderAvailable.into_response();
    };

    let mut req = req;
    if let Some(context) = req.extensions_mut().get_mut::<RequestContext>() {
        context.selected_provider = Some(top);
        context.routing_request = Some(routing_request);
    }

    next.run(req).await
}

pub async fn semantic_cache_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(chat_request) = req.extensions().get::<ChatRequest>().cloned() else {
        return next.run(req).await;
    };

    let provider_name = req
        .extensions()
        .get::<RequestContext>()
        .and_then(|context| context.selected_provider.as_ref())
        .map(|ranked| ranked.provider.clone())
        .unwrap_or_else(|| chat_request.model.clone());

    let skip_header = req.headers().get("X-Skip-Cache").is_some();
    let (cached, bypass) = state.cache.lookup(&chat_request, skip_header).await;

    if let Some(hit) = cached {
        state.metrics.record_cache_outcome(&provider_name, true);
        let score = 1.0 - hit.cosine_distance;
        let mut http_response = Json(hit.response).into_response();
        http_response
            .headers_mut()
            .insert("X-Cache", "HIT".parse().unwrap());
        http_response.headers_mut().insert(
            "X-Cache-Score",
            format!("{score:.4}").parse().unwrap(),
        );
        return http_response;
    }

    if bypass.is_none() {
        state.metrics.record_cache_outcome(&provider_name, false);
    }

    let cache_header = match bypass {
        Some(gateway_core::cache::CacheBypassReason::Disabled) => "DISABLED",
        Some(gateway_core::cache::CacheBypassReason::SkipHeader)
        | Some(gateway_core::cache::CacheBypassReason::Streaming) => "SKIP",
        Some(gateway_core::cache::CacheBypassReason::LookupError) | None => "MISS",
    };

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("X-Cache", cache_header.parse().unwrap());
    response
}
