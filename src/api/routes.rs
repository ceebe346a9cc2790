//! API routes configuration.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{handlers, state::AppState};

/// Create the API router with all inbound dispatch routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/v1/messages", post(handlers::anthropic_messages))
        .route("/v1/chat/completions", post(handlers::openai_chat_completions))
        // The wire path is `{model}:generateContent` as a single segment (the colon is
        // literal, not a route separator); the action suffix is split out in the handler.
        .route("/v1beta/models/:model_action", post(handlers::gemini_generate_content))
        .route("/v1/proxy/:model", post(handlers::antigravity_proxy))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
