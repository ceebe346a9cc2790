//! Inbound dispatch handlers: one per provider wire convention,
//! each resolving auth, building a `DispatchRequest`, and rendering the
//! result (or a classified error) in that provider's envelope shape.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

use super::auth::{authenticate, idempotency_key, request_id};
use super::envelope::namespace_for;
use super::state::AppState;
use crate::dispatch::{DispatchRequest, DispatchResult};
use crate::types::Platform;

async fn dispatch_request(
    state: &Arc<AppState>,
    headers: HeaderMap,
    query: HashMap<String, String>,
    scope: &str,
    method: &str,
    path: &str,
    platform: Platform,
    raw_body: axum::body::Bytes,
    stream_hint: Option<bool>,
    model_hint: Option<&str>,
) -> Response {
    let namespace = namespace_for(platform);

    let auth = match authenticate(state, &headers, &query).await {
        Ok(auth) => auth,
        Err(e) => return (e.status_and_code().0, Json(e.to_envelope(namespace))).into_response(),
    };

    let body: JsonValue = match serde_json::from_slice(&raw_body) {
        Ok(v) => v,
        Err(_) => {
            let err = crate::error::GatewayError::Validation("request body is not valid JSON".into());
            return (err.status_and_code().0, Json(err.to_envelope(namespace))).into_response();
        }
    };

    let model = model_hint
        .map(|s| s.to_string())
        .unwrap_or_else(|| body.get("model").and_then(|v| v.as_str()).unwrap_or_default().to_string());
    let stream = stream_hint.unwrap_or_else(|| body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false));
    let session_key = body
        .get("metadata")
        .and_then(|m| m.get("user_id").or_else(|| m.get("session_id")))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let req = DispatchRequest {
        scope: scope.to_string(),
        idempotency_key: idempotency_key(&headers),
        method: method.to_string(),
        path: path.to_string(),
        raw_body: raw_body.to_vec(),
        request_id: request_id(&headers),
        platform,
        model,
        session_key,
        stream,
        body,
    };

    match state.dispatch.dispatch(req, &auth.user, &auth.api_key, &auth.group).await {
        Ok(DispatchResult::Json { status, body, replayed }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            let mut response = (status, Json(body)).into_response();
            if replayed {
                response.headers_mut().insert("x-idempotency-replayed", "true".parse().unwrap());
            }
            response
        }
        Ok(DispatchResult::Stream { status, upstream }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            let body = axum::body::Body::from_stream(crate::executor::stream_pump(upstream, crate::executor::DEFAULT_STREAM_BUFFER));
            Response::builder()
                .status(status)
                .header("content-type", "text/event-stream")
                .header("cache-control", "no-cache")
                .body(body)
                .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR).into_response())
        }
        Err(e) => (e.status_and_code().0, Json(e.to_envelope(namespace))).into_response(),
    }
}

/// `POST /v1/messages` (Anthropic wire format).
pub async fn anthropic_messages(State(state): State<Arc<AppState>>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    dispatch_request(&state, headers, HashMap::new(), "anthropic.messages", "POST", "/v1/messages", Platform::Anthropic, body, None, None)
        .await
}

/// `POST /v1/chat/completions` (OpenAI-compatible wire format).
pub async fn openai_chat_completions(State(state): State<Arc<AppState>>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    dispatch_request(
        &state,
        headers,
        HashMap::new(),
        "openai.chat_completions",
        "POST",
        "/v1/chat/completions",
        Platform::OpenAi,
        body,
        None,
        None,
    )
    .await
}

/// `POST /v1beta/models/{model}:generateContent` and `:streamGenerateContent`.
/// The action suffix rides along in the same path segment as the model name
/// (a literal colon, not a route separator), so it's split out here.
pub async fn gemini_generate_content(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(model_action): axum::extract::Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let (model, action) = match model_action.split_once(':') {
        Some((model, action)) => (model, action),
        None => (model_action.as_str(), "generateContent"),
    };
    let stream = action == "streamGenerateContent";
    let path = format!("/v1beta/models/{model_action}");
    let scope = if stream { "gemini.stream_generate_content" } else { "gemini.generate_content" };
    dispatch_request(&state, headers, query, scope, "POST", &path, Platform::Gemini, body, Some(stream), Some(model)).await
}

/// `POST /v1/proxy/{model}` (Antigravity passthrough).
pub async fn antigravity_proxy(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(model): axum::extract::Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let path = format!("/v1/proxy/{model}");
    dispatch_request(&state, headers, HashMap::new(), "antigravity.proxy", "POST", &path, Platform::Antigravity, body, None, Some(&model))
        .await
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: String,
    uptime_seconds: u64,
    scheduler_stale: bool,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version.clone(),
        uptime_seconds: state.uptime_seconds(),
        scheduler_stale: state.scheduler.is_stale(120),
    })
}

pub async fn not_found() -> (StatusCode, Json<JsonValue>) {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" })))
}
