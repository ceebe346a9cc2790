//! Antigravity adapter: a proxied passthrough to an upstream whose shape is
//! dictated by `account.extra["antigravity_endpoint"]` rather than a fixed
//! path, since Antigravity fronts multiple upstream model families.

use async_trait::async_trait;

use super::super::protocol::{classify_status, AttemptResult, ProviderAdapter, UpstreamRequest, UpstreamResponse};
use crate::billing::TokenUsage;
use crate::error::{GatewayError, Result};
use crate::types::Account;

pub struct AntigravityAdapter {
    default_base_url: String,
}

impl AntigravityAdapter {
    pub fn new(default_base_url: impl Into<String>) -> Self {
        Self { default_base_url: default_base_url.into() }
    }
}

#[async_trait]
impl ProviderAdapter for AntigravityAdapter {
    async fn call(&self, client: &reqwest::Client, account: &Account, request: &UpstreamRequest) -> Result<AttemptResult> {
        let base_url = account
            .extra
            .get("antigravity_endpoint")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.default_base_url);
        let api_key = account
            .credentials
            .get("api_key")
            .ok_or_else(|| GatewayError::Auth(crate::error::AuthError::MissingCredentials))?;

        let response = client
            .post(format!("{base_url}/v1/proxy/{}", request.model))
            .bearer_auth(api_key)
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
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            images: 0,
        };

        Ok(AttemptResult::Success(UpstreamResponse { status, body, usage }))
    }
}
