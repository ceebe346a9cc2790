//! Inbound authentication: resolves whichever credential header the
//! route's provider convention uses into an `(User, ApiKey, Group)` triple.

use axum::http::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;

use super::state::AppState;
use crate::error::{AuthError, GatewayError, Result};
use crate::types::{ApiKey, Group, User};

/// The resolved identity of an inbound request, threaded through to dispatch.
pub struct AuthContext {
    pub user: User,
    pub api_key: ApiKey,
    pub group: Group,
}

/// Extracts the caller's key from whichever header (or query param, for the
/// Gemini `?key=` convention) the route accepts, then resolves it against the
/// repositories. Every inbound dispatch route calls this before building a
/// `DispatchRequest`.
pub async fn authenticate(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<AuthContext> {
    let key = extract_key(headers, query).ok_or(GatewayError::Auth(AuthError::MissingCredentials))?;

    let row = state
        .api_keys
        .find_by_key(&key)
        .await
        .map_err(GatewayError::Database)?
        .ok_or(GatewayError::Auth(AuthError::InvalidKey))?;
    let api_key = row.into_api_key().ok_or(GatewayError::Auth(AuthError::InvalidKey))?;

    if api_key.status != crate::types::ApiKeyStatus::Active {
        return Err(GatewayError::Auth(AuthError::InvalidKey));
    }
    if let Some(expires_at) = api_key.expires_at {
        if expires_at <= chrono::Utc::now() {
            return Err(GatewayError::Auth(AuthError::InvalidKey));
        }
    }

    let user_row = state.users.get_by_id(api_key.user_id).await.map_err(GatewayError::Database)?;
    let user = user_row
        .and_then(|r| r.into_user())
        .ok_or(GatewayError::Auth(AuthError::InvalidKey))?;
    if user.status != crate::types::UserStatus::Active {
        return Err(GatewayError::Auth(AuthError::UserDisabled));
    }

    let group_id = api_key.group_id.ok_or_else(|| GatewayError::Validation("api key has no associated group".into()))?;
    let group_row = state.groups.get_by_id(group_id).await.map_err(GatewayError::Database)?;
    let group = group_row
        .and_then(|r| r.into_group())
        .ok_or_else(|| GatewayError::Validation("api key group not found".into()))?;
    if group.status != crate::types::GroupStatus::Active {
        return Err(GatewayError::Validation("group is disabled".into()));
    }

    Ok(AuthContext { user, api_key, group })
}

fn extract_key(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(v) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(bearer) = v.strip_prefix("Bearer ") {
            return Some(bearer.to_string());
        }
    }
    if let Some(v) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(v.to_string());
    }
    if let Some(v) = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) {
        return Some(v.to_string());
    }
    query.get("key").cloned()
}

/// Pulls the `X-Request-ID` header or mints a fresh one.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Pulls `Idempotency-Key`, if present.
pub fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}
