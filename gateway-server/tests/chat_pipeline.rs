//! End-to-end coverage of the eleven-step request pipeline against
//! `/v1/chat/completions`, driven through a real `axum` router the way the
//! teacher's own middleware integration tests did, with a scripted provider
//! standing in for a live vendor.

mod common;

use serde_json::json;

use common::{bearer, test_config, test_server, test_state, with_routing_rules};
use gateway_core::error::ProviderError;
use gateway_core::models::{ChatResponse, Choice, Message};
use gateway_core::rules::{Condition, RoutingRule};

fn ok_response(model: &str) -> ChatResponse {
    ChatResponse {
        id: "chatcmpl-test".to_string(),
        object: "chat.completion".to_string(),
        created: 0,
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant("hello there"),
            finish_reason: Some("stop".to_string()),
        }],
        usage: None,
    }
}

fn chat_body() -> serde_json::Value {
    json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "hi"}],
    })
}

#[tokio::test]
async fn missing_auth_header_is_rejected() {
    let state = test_state(test_config("openai"), "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    let response = server.post("/v1/chat/completions").json(&chat_body()).await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn wrong_bearer_key_is_rejected() {
    let state = test_state(test_config("openai"), "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", "Bearer not-the-right-key")
        .json(&chat_body())
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn successful_request_tags_a_cache_miss_and_echoes_request_id() {
    let state = test_state(test_config("openai"), "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .add_header("x-request-id", "req-123")
        .json(&chat_body())
        .await;

    response.assert_status_ok();
    assert_eq!(response.header("x-cache"), "MISS");
    assert_eq!(response.header("x-request-id"), "req-123");
    let body: serde_json::Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "hello there");
}

#[tokio::test]
async fn second_identical_request_is_served_from_cache() {
    let state = test_state(
        test_config("openai"),
        "openai",
        vec![Ok(ok_response("gpt-4o")), Err(ProviderError::ServiceUnavailable)],
    );
    let server = test_server(state);

    let first = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&chat_body())
        .await;
    first.assert_status_ok();
    assert_eq!(first.header("x-cache"), "MISS");

    let second = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&chat_body())
        .await;
    second.assert_status_ok();
    assert_eq!(second.header("x-cache"), "HIT");
    let body: serde_json::Value = second.json();
    assert_eq!(body["choices"][0]["message"]["content"], "hello there");
}

#[tokio::test]
async fn skip_cache_header_forces_a_fresh_upstream_call() {
    let state = test_state(test_config("openai"), "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&chat_body())
        .await
        .assert_status_ok();

    let skipped = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .add_header("X-Skip-Cache", "true")
        .json(&chat_body())
        .await;
    skipped.assert_status_ok();
    assert_eq!(skipped.header("x-cache"), "SKIP");
}

#[tokio::test]
async fn cache_hit_carries_a_similarity_score() {
    let state = test_state(test_config("openai"), "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&chat_body())
        .await
        .assert_status_ok();

    let second = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&chat_body())
        .await;
    second.assert_status_ok();
    assert_eq!(second.header("x-cache"), "HIT");
    let score: f64 = second.header("x-cache-score").to_str().unwrap().parse().unwrap();
    assert!(score > 0.9);
}

#[tokio::test]
async fn disabled_cache_is_reported_distinctly_from_a_miss() {
    let mut config = test_config("openai");
    config.cache.enabled = false;
    let state = test_state(config, "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&chat_body())
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("x-cache"), "DISABLED");
}

#[tokio::test]
async fn cost_routing_strategy_header_is_accepted() {
    let state = test_state(test_config("openai"), "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .add_header("x-routing-strategy", "cost")
        .json(&chat_body())
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn streaming_request_returns_an_event_stream_and_skips_the_cache() {
    let state = test_state(test_config("openai"), "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    let mut body = chat_body();
    body["stream"] = json!(true);
    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&body)
        .await;

    response.assert_status_ok();
    assert_eq!(response.header("x-cache"), "SKIP");
    let content_type = response.header("content-type");
    assert!(content_type.to_str().unwrap().starts_with("text/event-stream"));
    let text = response.text();
    assert!(text.contains("hello there"));
    assert!(text.contains("[DONE]"));
}

#[tokio::test]
async fn empty_model_is_rejected_before_any_upstream_call() {
    let state = test_state(test_config("openai"), "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    let mut body = chat_body();
    body["model"] = json!("");
    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&body)
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn all_providers_failing_surfaces_as_service_unavailable() {
    let state = test_state(
        test_config("openai"),
        "openai",
        vec![Err(ProviderError::ServiceUnavailable)],
    );
    let server = test_server(state);

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&chat_body())
        .await;
    response.assert_status_service_unavailable();
}

#[tokio::test]
async fn unknown_model_has_no_candidate_provider() {
    let state = test_state(test_config("openai"), "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    let mut body = chat_body();
    body["model"] = json!("not-a-real-model");
    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&body)
        .await;
    response.assert_status_service_unavailable();
}

#[tokio::test]
async fn rate_limited_provider_returns_retry_after() {
    let mut config = test_config("openai");
    config.providers.get_mut("openai").unwrap().rate_limit_capacity = 1.0;
    config.providers.get_mut("openai").unwrap().rate_limit_refill_per_sec = 0.01;

    let state = test_state(config, "openai", vec![Ok(ok_response("gpt-4o")), Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&chat_body())
        .await
        .assert_status_ok();

    let second = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&chat_body())
        .await;
    second.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    assert!(second.header("retry-after").to_str().unwrap().parse::<u64>().unwrap() >= 1);
}

#[tokio::test]
async fn routing_rule_excluding_the_only_candidate_leaves_no_provider() {
    let rule = RoutingRule {
        id: "block-openai".to_string(),
        priority: 1,
        condition: Condition::Capability {
            required: vec!["chat".to_string()],
        },
        preferred_providers: vec![],
        exclude_providers: vec!["openai".to_string()],
    };
    let config = with_routing_rules(test_config("openai"), vec![rule]);
    let state = test_state(config, "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", bearer())
        .json(&chat_body())
        .await;
    response.assert_status_service_unavailable();
}

#[tokio::test]
async fn health_and_ready_need_no_authentication() {
    let state = test_state(test_config("openai"), "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    server.get("/health").await.assert_status_ok();
    server.get("/ready").await.assert_status_ok();
}

#[tokio::test]
async fn admin_and_metrics_routes_require_the_gateway_key() {
    let state = test_state(test_config("openai"), "openai", vec![Ok(ok_response("gpt-4o"))]);
    let server = test_server(state);

    server.get("/metrics").await.assert_status_unauthorized();
    server.get("/metrics/costs").await.assert_status_unauthorized();
    server.get("/admin/providers").await.assert_status_unauthorized();

    server
        .get("/metrics")
        .add_header("Authorization", bearer())
        .await
        .assert_status_ok();
    server
        .get("/metrics/costs")
        .add_header("Authorization", bearer())
        .await
        .assert_status_ok();
    server
        .get("/admin/providers")
        .add_header("Authorization", bearer())
        .await
        .assert_status_ok();
}

