//! Integration tests for POST /api/chat.
//!
//! The upstream completion API is a wiremock server returning canned
//! `text/event-stream` bodies; the relay router is driven with
//! `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatrelay::auth::CredentialSource;
use chatrelay::config::{ApiKey, AuthConfig, Config, ErrorPolicy, UpstreamConfig};
use chatrelay::proxy::{create_router, AppState};

const DONE: &str = "data: {\"type\":\"done\"}\n\n";

fn token(text: &str) -> String {
    format!("data: {{\"type\":\"token\",\"text\":\"{}\"}}\n\n", text)
}

/// Upstream SSE line carrying one content delta.
fn delta(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"id": "chatcmpl-1", "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]})
    )
}

fn finish() -> String {
    "data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n"
        .to_string()
}

/// Start a mock upstream that answers every completion call with `body`.
async fn start_upstream(body: String) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;
    server
}

fn test_config(base_url: String) -> Config {
    Config {
        upstream: UpstreamConfig {
            base_url,
            default_model: "test-default-model".to_string(),
            ..Default::default()
        },
        auth: AuthConfig {
            api_key: Some(ApiKey::from("sk-test")),
            token_env: None,
        },
        ..Default::default()
    }
}

fn app(config: Config) -> axum::Router {
    create_router(AppState::new(config).expect("build state"))
}

async fn post_chat(app: axum::Router, body: &str) -> (StatusCode, HeaderMap, String) {
    let request = Request::post("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn upstream_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.body_json::<Value>().unwrap())
        .collect()
}

// ============================================================================
// Streaming path
// ============================================================================

#[tokio::test]
async fn test_prompt_streams_tokens_then_done() {
    let upstream = start_upstream(format!("{}{}{}", delta("Hel"), delta("lo"), finish())).await;
    let (status, headers, body) =
        post_chat(app(test_config(format!("{}/v1", upstream.uri()))), r#"{"prompt":"hi"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "text/event-stream");
    assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
    assert_eq!(headers.get("connection").unwrap(), "keep-alive");
    assert!(headers.get("x-request-id").is_some());
    assert_eq!(body, format!("{}{}{}", token("Hel"), token("lo"), DONE));
}

#[tokio::test]
async fn test_upstream_receives_normalized_request() {
    let upstream = start_upstream(finish()).await;
    let (status, _, _) =
        post_chat(app(test_config(format!("{}/v1", upstream.uri()))), r#"{"prompt":"hi"}"#).await;
    assert_eq!(status, StatusCode::OK);

    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("authorization").unwrap(),
        "Bearer sk-test"
    );
    assert_eq!(
        requests[0].body_json::<Value>().unwrap(),
        json!({
            "model": "test-default-model",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        })
    );
}

#[tokio::test]
async fn test_messages_take_priority_and_model_is_forwarded() {
    let upstream = start_upstream(finish()).await;
    let body = json!({
        "messages": [{"role": "user", "content": ["hello", {"type": "image_url", "image_url": {"url": "u"}}]}],
        "prompt": "ignored",
        "model": "caller-model"
    });
    let (status, _, _) = post_chat(
        app(test_config(format!("{}/v1", upstream.uri()))),
        &body.to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let sent = upstream_bodies(&upstream).await;
    assert_eq!(sent[0]["model"], "caller-model");
    assert_eq!(
        sent[0]["messages"],
        json!([{"role": "user", "content": [
            {"type": "text", "text": "hello"},
            {"type": "image_url", "image_url": {"url": "u"}}
        ]}])
    );
}

#[tokio::test]
async fn test_chunk_without_choices_is_skipped() {
    let usage = "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3}}\n\n";
    let upstream = start_upstream(format!("{}{}{}{}", delta("a"), usage, delta("b"), finish())).await;
    let (_, _, body) =
        post_chat(app(test_config(format!("{}/v1", upstream.uri()))), r#"{"prompt":"x"}"#).await;
    assert_eq!(body, format!("{}{}{}", token("a"), token("b"), DONE));
}

#[tokio::test]
async fn test_chunks_after_finish_are_not_relayed() {
    let upstream = start_upstream(format!(
        "{}{}{}data: [DONE]\n\n",
        delta("kept"),
        finish(),
        delta("late")
    ))
    .await;
    let (_, _, body) =
        post_chat(app(test_config(format!("{}/v1", upstream.uri()))), r#"{"prompt":"x"}"#).await;
    assert_eq!(body, format!("{}{}", token("kept"), DONE));
}

#[tokio::test]
async fn test_mid_stream_error_replaces_done() {
    let failure = "data: {\"error\":{\"message\":\"model overloaded\"}}\n\n";
    let upstream = start_upstream(format!("{}{}{}", delta("part"), failure, delta("never"))).await;
    let (status, _, body) =
        post_chat(app(test_config(format!("{}/v1", upstream.uri()))), r#"{"prompt":"x"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        format!(
            "{}data: {{\"type\":\"error\",\"message\":\"model overloaded\"}}\n\n",
            token("part")
        )
    );
    assert!(!body.contains("\"done\""));
}

#[tokio::test]
async fn test_mid_stream_error_sanitized_by_policy() {
    let failure = "data: {\"error\":{\"message\":\"internal host 10.1.2.3 failed\"}}\n\n";
    let upstream = start_upstream(format!("{}{}", delta("part"), failure)).await;
    let mut config = test_config(format!("{}/v1", upstream.uri()));
    config.errors = ErrorPolicy {
        expose_upstream_detail: false,
    };
    let (_, _, body) = post_chat(app(config), r#"{"prompt":"x"}"#).await;

    assert!(body.starts_with(&token("part")));
    assert!(body.ends_with(
        "data: {\"type\":\"error\",\"message\":\"The model stream was interrupted.\"}\n\n"
    ));
    assert!(!body.contains("10.1.2.3"));
}

#[tokio::test]
async fn test_oversized_upstream_line_ends_with_error() {
    let oversized = delta(&"y".repeat(70 * 1024));
    let upstream = start_upstream(format!("{}{}{}", delta("before"), oversized, finish())).await;
    let (status, _, body) =
        post_chat(app(test_config(format!("{}/v1", upstream.uri()))), r#"{"prompt":"x"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        format!(
            "{}data: {{\"type\":\"error\",\"message\":\"Upstream SSE line exceeded 64 KiB\"}}\n\n",
            token("before")
        )
    );
}

#[tokio::test]
async fn test_upstream_exhaustion_without_finish_is_done() {
    let upstream = start_upstream(delta("only")).await;
    let (_, _, body) =
        post_chat(app(test_config(format!("{}/v1", upstream.uri()))), r#"{"prompt":"x"}"#).await;
    assert_eq!(body, format!("{}{}", token("only"), DONE));
}

// ============================================================================
// Synchronous error responses
// ============================================================================

#[tokio::test]
async fn test_missing_input_is_400_and_no_stream_opened() {
    let upstream = start_upstream(finish()).await;
    for body in ["{}", r#"{"prompt":""}"#, r#"{"messages":[]}"#, "not json", ""] {
        let (status, headers, response) =
            post_chat(app(test_config(format!("{}/v1", upstream.uri()))), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {:?}", body);
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
        assert_eq!(
            serde_json::from_str::<Value>(&response).unwrap(),
            json!({"error": "Provide either `messages` or `prompt`."})
        );
    }
    assert!(upstream_bodies(&upstream).await.is_empty());
}

#[tokio::test]
async fn test_missing_api_key_is_500() {
    let upstream = start_upstream(finish()).await;
    let mut config = test_config(format!("{}/v1", upstream.uri()));
    config.auth.api_key = None;
    let (status, headers, body) = post_chat(app(config), r#"{"prompt":"hi"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_ne!(headers.get("content-type").unwrap(), "text/event-stream");
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!({"error": "OpenAI API key is not configured."})
    );
    assert!(upstream_bodies(&upstream).await.is_empty());
}

#[tokio::test]
async fn test_missing_gateway_token_is_500() {
    let upstream = start_upstream(finish()).await;
    let mut config = test_config(format!("{}/v1", upstream.uri()));
    config.auth.token_env = Some("CHATRELAY_IT_TOKEN_NEVER_SET_9f2c".to_string());
    let (status, _, body) = post_chat(app(config), r#"{"prompt":"hi"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!({"error": "Unable to authenticate with AI Gateway"})
    );
    assert!(upstream_bodies(&upstream).await.is_empty());
}

struct FixedToken(&'static str);

#[async_trait]
impl CredentialSource for FixedToken {
    async fn bearer_token(&self) -> chatrelay::Result<ApiKey> {
        Ok(ApiKey::from(self.0))
    }
}

#[tokio::test]
async fn test_injected_credential_source_is_used() {
    let upstream = start_upstream(finish()).await;
    let state = AppState::with_credentials(
        test_config(format!("{}/v1", upstream.uri())),
        Arc::new(FixedToken("injected-token")),
    )
    .unwrap();
    let (status, _, _) = post_chat(create_router(state), r#"{"prompt":"hi"}"#).await;
    assert_eq!(status, StatusCode::OK);

    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(
        requests[0].headers.get("authorization").unwrap(),
        "Bearer injected-token"
    );
}

#[tokio::test]
async fn test_upstream_error_status_is_502() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({"error": {"message": "down"}})),
        )
        .mount(&server)
        .await;

    let (status, _, body) =
        post_chat(app(test_config(format!("{}/v1", server.uri()))), r#"{"prompt":"hi"}"#).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!({"error": "Unable to initiate model stream"})
    );
}

#[tokio::test]
async fn test_unreachable_upstream_is_502() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (status, _, body) = post_chat(
        app(test_config(format!("http://127.0.0.1:{}/v1", port))),
        r#"{"prompt":"hi"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!({"error": "Unable to initiate model stream"})
    );
}
