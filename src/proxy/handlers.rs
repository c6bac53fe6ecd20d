//! HTTP request handlers.

use axum::{
    body::{Body, Bytes},
    extract::{Extension, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{Instrument, Span};

use super::normalize::normalize;
use super::server::{AppState, RequestId};
use super::sse::encode_events;
use super::stream::FragmentStream;
use super::types::Message;
use crate::error::Error;

/// Parse the request body, treating malformed or non-object JSON as `{}`.
pub fn parse_payload(body: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(Default::default()),
    }
}

/// Handle POST /api/chat
///
/// Failures before the upstream answers are plain JSON error responses.
/// Once streaming starts the status is 200 and failures arrive as the
/// final `error` frame.
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Result<Response, Error> {
    let span = tracing::info_span!("chat", request_id = %request_id.0);
    relay(state, body, span.clone()).instrument(span).await
}

async fn relay(state: AppState, body: Bytes, span: Span) -> Result<Response, Error> {
    let payload = parse_payload(&body);
    let request = normalize(&payload, &state.config.upstream.default_model).inspect_err(|e| {
        tracing::warn!(error = %e, "Rejected chat request");
    })?;

    tracing::info!(
        model = %request.model,
        messages = request.messages.len(),
        form = request.form.as_str(),
        "Received chat request"
    );

    let fragments = open_stream(&state, &request.model, &request.messages)
        .await
        .inspect_err(|e| {
            let kind = e.kind();
            tracing::warn!(
                kind = ?kind,
                retryable = kind.is_retryable(),
                status = e.status_code().as_u16(),
                "Model stream not opened"
            );
        })?;
    let events = encode_events(fragments.into_stream(), state.config.errors.clone(), span);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(events))
        .map_err(|e| Error::Internal(e.to_string()))
}

/// Acquire credentials and open the upstream stream.
async fn open_stream(
    state: &AppState,
    model: &str,
    messages: &[Message],
) -> Result<FragmentStream, Error> {
    let token = state.credentials.bearer_token().await.inspect_err(|e| {
        tracing::error!(error = %e, "Credential acquisition failed");
    })?;

    state.upstream.open_stream(&token, model, messages).await
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatrelay"
    }))
}
