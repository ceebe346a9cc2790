//! Anthropic adapter: `POST /v1/messages`.

use async_trait::async_trait;

use super::super::protocol::{classify_status, AttemptResult, ProviderAdapter, UpstreamRequest, UpstreamResponse};
use crate::billing::TokenUsage;
use crate::error::{GatewayError, Result};
use crate::types::Account;

pub struct AnthropicAdapter {
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn call(&self, client: &reqwest::Client, account: &Account, request: &UpstreamRequest) -> Result<AttemptResult> {
        let url = format!("{}/v1/messages", self.base_url);
        let api_key = account
            .credentials
            .get("api_key")
            .or_else(|| account.credentials.get("access_token"))
            .ok_or_else(|| GatewayError::Auth(crate::error::AuthError::MissingCredentials))?;

        let response = client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request.body)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamTransient(e.to_string()))?;

        let status = response.status().as_u16();
        if request.stream && (200..300).contains(&status) {
            return Ok(AttemptResult::Streaming { status, upstream: response });
        }

        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::json!({}));

        if !(200..300).contains(&status) {
            return Ok(AttemptResult::Failed(classify_status(status, &body)));
        }

        let usage = TokenUsage {
            input_tokens: body["usage"]["input_tokens"].as_i64().unwrap_or(0),
            output_tokens: body["usage"]["output_tokens"].as_i64().unwrap_or(0),
            cache_creation_tokens: body["usage"]["cache_creation_input_tokens"].as_i64().unwrap_or(0),
            cache_read_tokens: body["usage"]["cache_read_input_tokens"].as_i64().unwrap_or(0),
            images: 0,
        };

        Ok(AttemptResult::Success(UpstreamResponse { status, body, usage }))
    }
}
