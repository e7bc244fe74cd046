//! The terminal `/v1/chat/completions` route. Everything upstream of this
//! handler (auth, rate limiting, deadline, provider ranking, cache lookup)
//! has already run; this handler's only job is the resilient upstream call
//! and, on a cacheable non-streaming success, writing the entry back.

use std::time::Instant;

use axum::extract::{Extension, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use tokio_util::sync::CancellationToken;

use gateway_core::fallback::FallbackOptions;
use gateway_core::models::{ChatRequest, ChatResponse, Delta, Role, StreamChoice, StreamChunk};
use gateway_core::routing::RoutingRequest;

use crate::gateway_error::GatewayError;
use crate::request_context::RequestContext;
use crate::server::AppState;

pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Extension(chat_request): Extension<ChatRequest>,
) -> Response {
    let streaming = chat_request.stream.unwrap_or(false);
    let deadline = context.deadline.clone().unwrap_or_else(CancellationToken::new);

    let routing_request = context.routing_request.clone().unwrap_or_else(|| RoutingRequest {
        model: chat_request.model.clone(),
        streaming,
        ..RoutingRequest::default()
    });

    let options = FallbackOptions {
        max_retries: state
            .config
            .providers
            .values()
            .map(|p| p.max_retries)
            .max()
            .unwrap_or(2),
        streaming,
        ..FallbackOptions::default()
    };

    let providers = state.providers.clone();
    let request_for_call = chat_request.clone();

    let result = state
        .selector
        .select_with_fallback(
            &routing_request,
            &state.registry,
            &state.config.routing.rules,
            &deadline,
            &options,
            move |provider_name, attempt_token| {
                let providers = providers.clone();
                let request = request_for_call.clone();
                async move {
                    let Some(provider) = providers.get(&provider_name).cloned() else {
                        return Err(gateway_core::error::ProviderError::ServiceUnavailable);
                    };
                    let started = Instant::now();
                    tokio::select! {
                        outcome = provider.chat_completion(request) => {
                            outcome.map(|response| (response, started.elapsed().as_millis() as u64))
                        }
                        _ = attempt_token.cancelled() => {
                            Err(gateway_core::error::ProviderError::Timeout)
                        }
                    }
                }
            },
        )
        .await;

    let provider_name = context
        .selected_provider
        .as_ref()
        .map(|p| p.provider.as_str())
        .unwrap_or(&chat_request.model)
        .to_string();

    match result {
        Ok((response, _attempts)) => {
            if !streaming {
                let cost = response
                    .usage
                    .as_ref()
                    .and_then(|usage| {
                        state
                            .selector
                            .pricing(&provider_name, &response.model)
                            .map(|pricing| usage_cost(&pricing, usage))
                    })
                    .unwrap_or(0.0);
                if let Err(err) = state.cache.store(&chat_request, &response).await {
                    tracing::warn!(error = %err, "semantic cache store failed");
                }
                state.metrics.record_request(&provider_name, false, cost);
                return Json(response).into_response();
            }
            stream_response(response).into_response()
        }
        Err(err) => {
            // No usage to price on a failed attempt -- the request was never
            // billed by the upstream, so cost stays zero.
            state.metrics.record_request(&provider_name, true, 0.0);
            GatewayError::from(err).into_response()
        }
    }
}

fn usage_cost(pricing: &gateway_core::pricing::ModelPricing, usage: &gateway_core::models::Usage) -> f64 {
    pricing.input_per_1k * usage.prompt_tokens as f64 / 1000.0
        + pricing.output_per_1k * usage.completion_tokens as f64 / 1000.0
}

/// Replays a single buffered completion as an SSE stream: one delta chunk
/// carrying the full message content, then the `[DONE]` sentinel. Providers
/// behind the `Provider` trait return a complete `ChatResponse` rather than
/// token-by-token deltas (see `gateway_core::providers::Provider`), so true
/// incremental streaming happens at the vendor adapter, not here.
fn response_to_stream_chunk(response: &ChatResponse) -> StreamChunk {
    StreamChunk {
        id: response.id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: response.created,
        model: response.model.clone(),
        choices: response
            .choices
            .iter()
            .map(|choice| StreamChoice {
                index: choice.index,
                delta: Delta {
                    role: Some(Role::Assistant),
                    content: Some(choice.message.content.clone()),
                },
                finish_reason: choice.finish_reason.clone(),
            })
            .collect(),
    }
}

fn stream_response(response: ChatResponse) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let chunk = response_to_stream_chunk(&response);
    let data = serde_json::to_string(&chunk).unwrap_or_default();
    let events = vec![
        Ok(Event::default().data(data)),
        Ok(Event::default().data("[DONE]")),
    ];
    Sse::new(stream::iter(events)).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::models::{Choice, Message};

    fn sample_response() -> ChatResponse {
        ChatResponse {
            id: "chatcmpl-test".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant("hello there"),
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        }
    }

    #[test]
    fn response_to_stream_chunk_carries_the_full_message_as_one_delta() {
        let chunk = response_to_stream_chunk(&sample_response());
        assert_eq!(chunk.object, "chat.completion.chunk");
        assert_eq!(chunk.choices.len(), 1);
        assert_eq!(chunk.choices[0].delta.role, Some(Role::Assistant));
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hello there"));
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn response_to_stream_chunk_serializes_to_a_single_json_object() {
        let chunk = response_to_stream_chunk(&sample_response());
        let json = serde_json::to_string(&chunk).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["choices"][0]["delta"]["content"], "hello there");
    }

    #[test]
    fn usage_cost_prices_input_and_output_tokens_independently() {
        let pricing = gateway_core::pricing::ModelPricing {
            input_per_1k: 0.005,
            output_per_1k: 0.015,
        };
        let usage = gateway_core::models::Usage {
            prompt_tokens: 1000,
            completion_tokens: 500,
            total_tokens: 1500,
        };
        let cost = usage_cost(&pricing, &usage);
        assert!((cost - (0.005 + 0.0075)).abs() < 1e-9);
    }
}
