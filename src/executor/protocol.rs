//! Provider-agnostic call protocol shared across adapters.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::billing::TokenUsage;
use crate::error::Result;
use crate::ratelimit::UpstreamOutcome;
use crate::types::Account;

pub struct UpstreamRequest {
    pub model: String,
    pub stream: bool,
    pub body: JsonValue,
}

pub struct UpstreamResponse {
    pub status: u16,
    pub body: JsonValue,
    pub usage: TokenUsage,
}

/// Result of one attempt against one account: a buffered response, a live
/// upstream body handed back unread for SSE passthrough, or a classified
/// failure the caller advances on.
pub enum AttemptResult {
    Success(UpstreamResponse),
    Streaming { status: u16, upstream: reqwest::Response },
    Failed(UpstreamOutcome),
}

/// One provider's wire format. Implementors own request construction, usage
/// parsing, and status-to-outcome classification for their API shape.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn call(&self, client: &reqwest::Client, account: &Account, request: &UpstreamRequest) -> Result<AttemptResult>;
}

/// Maps a raw HTTP status (and, for 4xx, the parsed body) to an outcome
/// under the shared classification policy, so status handling doesn't drift
/// between providers.
pub fn classify_status(status: u16, body: &JsonValue) -> UpstreamOutcome {
    match status {
        200..=299 => UpstreamOutcome::Success,
        401 | 403 => UpstreamOutcome::AuthInvalid,
        408 => UpstreamOutcome::Transient { status },
        429 => UpstreamOutcome::RateLimited { reset_hint: None },
        529 => UpstreamOutcome::Overloaded,
        500..=599 => UpstreamOutcome::Transient { status },
        400 if is_invalid_request_model_routing(body) => UpstreamOutcome::InvalidRequestModelRouting,
        _ => UpstreamOutcome::ClientError { status },
    }
}

fn is_invalid_request_model_routing(body: &JsonValue) -> bool {
    body.get("error")
        .and_then(|e| e.get("type").or_else(|| e.get("code")))
        .and_then(|t| t.as_str())
        .map(|t| t.contains("invalid_request") || t.contains("model_not_found"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_529_to_overloaded() {
        assert!(matches!(classify_status(529, &serde_json::json!({})), UpstreamOutcome::Overloaded));
    }

    #[test]
    fn maps_401_to_auth_invalid() {
        assert!(matches!(classify_status(401, &serde_json::json!({})), UpstreamOutcome::AuthInvalid));
    }

    #[test]
    fn maps_plain_400_to_client_error() {
        assert!(matches!(classify_status(400, &serde_json::json!({})), UpstreamOutcome::ClientError { .. }));
    }

    #[test]
    fn maps_invalid_request_body_400_to_model_routing() {
        let body = serde_json::json!({"error": {"type": "invalid_request_error: model_not_found"}});
        assert!(matches!(classify_status(400, &body), UpstreamOutcome::InvalidRequestModelRouting));
    }
}
