//! Error taxonomy for the dispatch core.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Top-level error type. Each variant carries the classification tag the
/// executor and scheduler use to decide retry/failover before the error is
/// ever rendered to a caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing or invalid API key")]
    Auth(#[from] AuthError),

    #[error("quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("idempotency error: {0}")]
    Idempotency(#[from] IdempotencyError),

    #[error("no schedulable account")]
    NoCandidate,

    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),

    #[error("upstream rate limited")]
    UpstreamRateLimited,

    #[error("upstream overloaded")]
    UpstreamOverloaded,

    #[error("upstream auth invalid")]
    UpstreamAuthInvalid,

    #[error("upstream client error: {status}: {message}")]
    UpstreamClientError { status: u16, message: String },

    #[error("request requires fallback-group routing: {0}")]
    FallbackGroupRequested(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("invalid api key")]
    InvalidKey,
    #[error("user disabled")]
    UserDisabled,
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("balance exhausted")]
    BalanceExhausted,
    #[error("subscription expired")]
    SubscriptionExpired,
    #[error("usage window limit exceeded: {0}")]
    WindowLimitExceeded(String),
    #[error("api key quota exceeded")]
    ApiKeyQuotaExceeded,
}

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("duplicate request currently in flight")]
    Conflict,
    #[error("idempotency key reused with a different request")]
    FingerprintMismatch,
    #[error("idempotency coordinator unavailable")]
    CoordinatorUnavailable,
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Which provider-native envelope shape to render an error into. Selected by
/// the inbound route that produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorNamespace {
    OpenAi,
    Anthropic,
    Google,
}

impl GatewayError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::Auth(_) => (StatusCode::UNAUTHORIZED, "auth_error"),
            GatewayError::Quota(QuotaError::WindowLimitExceeded(_)) => {
                (StatusCode::TOO_MANY_REQUESTS, "quota_window_exceeded")
            }
            GatewayError::Quota(_) => (StatusCode::FORBIDDEN, "quota_error"),
            GatewayError::Idempotency(IdempotencyError::Conflict) => {
                (StatusCode::CONFLICT, "idempotency_conflict")
            }
            GatewayError::Idempotency(IdempotencyError::FingerprintMismatch) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "idempotency_key_reused")
            }
            GatewayError::Idempotency(IdempotencyError::CoordinatorUnavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, "idempotency_unavailable")
            }
            GatewayError::NoCandidate => (StatusCode::SERVICE_UNAVAILABLE, "no_candidate"),
            GatewayError::UpstreamTransient(_) => (StatusCode::BAD_GATEWAY, "upstream_transient"),
            GatewayError::UpstreamRateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, "upstream_rate_limited")
            }
            GatewayError::UpstreamOverloaded => {
                (StatusCode::from_u16(529).unwrap_or(StatusCode::SERVICE_UNAVAILABLE), "upstream_overloaded")
            }
            GatewayError::UpstreamAuthInvalid => (StatusCode::UNAUTHORIZED, "upstream_auth_invalid"),
            GatewayError::UpstreamClientError { status, .. } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
                "upstream_client_error",
            ),
            GatewayError::FallbackGroupRequested(_) => (StatusCode::BAD_REQUEST, "fallback_group_exhausted"),
            GatewayError::Cache(_) => (StatusCode::SERVICE_UNAVAILABLE, "cache_error"),
            GatewayError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            GatewayError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            GatewayError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    /// Render into a provider-native error envelope.
    pub fn to_envelope(&self, namespace: ErrorNamespace) -> serde_json::Value {
        let (status, code) = self.status_and_code();
        match namespace {
            ErrorNamespace::OpenAi => json!({
                "error": {
                    "message": self.to_string(),
                    "type": code,
                    "code": status.as_u16(),
                }
            }),
            ErrorNamespace::Anthropic => json!({
                "type": "error",
                "error": {
                    "type": code,
                    "message": self.to_string(),
                }
            }),
            ErrorNamespace::Google => json!({
                "error": {
                    "code": status.as_u16(),
                    "message": self.to_string(),
                    "status": code,
                }
            }),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": code,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429() {
        let err = GatewayError::UpstreamRateLimited;
        assert_eq!(err.status_and_code().0, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn idempotency_conflict_maps_to_409() {
        let err: GatewayError = IdempotencyError::Conflict.into();
        assert_eq!(err.status_and_code().0, StatusCode::CONFLICT);
    }

    #[test]
    fn fingerprint_mismatch_maps_to_422() {
        let err: GatewayError = IdempotencyError::FingerprintMismatch.into();
        assert_eq!(err.status_and_code().0, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn anthropic_envelope_has_type_error() {
        let err = GatewayError::UpstreamRateLimited;
        let body = err.to_envelope(ErrorNamespace::Anthropic);
        assert_eq!(body["type"], "error");
    }

    #[test]
    fn openai_envelope_nests_message() {
        let err = GatewayError::NoCandidate;
        let body = err.to_envelope(ErrorNamespace::OpenAi);
        assert!(body["error"]["message"].as_str().is_some());
    }
}
