//! Dispatch orchestration: wires Idempotency -> Scheduler ->
//! Limiter -> Executor -> classify -> Billing in the exact order the data
//! flow line prescribes.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::billing::{BillingEnforcer, TokenUsage};
use crate::config::ProxyPoolEntry;
use crate::error::{GatewayError, Result};
use crate::executor::failover;
use crate::executor::{FailoverConfig, FailoverResponse, ProviderAdapter, UpstreamRequest};
use crate::idempotency::{BeginOutcome, IdempotencyCoordinator};
use crate::limiter::Limiter;
use crate::ratelimit::{ClassifyConfig, MarkerApplier};
use crate::scheduler::{select_candidates, Scheduler, StickyBindings};
use crate::types::{ApiKey, Group, Platform, User, UsageLog};

pub struct DispatchRequest {
    pub scope: String,
    pub idempotency_key: Option<String>,
    pub method: String,
    pub path: String,
    pub raw_body: Vec<u8>,
    pub request_id: String,
    pub platform: Platform,
    pub model: String,
    pub session_key: Option<String>,
    pub stream: bool,
    pub body: JsonValue,
}

/// A rendered dispatch outcome, buffered JSON or a live upstream body the
/// caller pumps through as SSE.
pub enum DispatchResult {
    Json { status: u16, body: JsonValue, replayed: bool },
    Stream { status: u16, upstream: reqwest::Response },
}

pub struct DispatchCore {
    pub scheduler: Arc<Scheduler>,
    pub limiter: Limiter,
    pub idempotency: IdempotencyCoordinator,
    pub billing: BillingEnforcer,
    pub markers: MarkerApplier,
    pub cache: Arc<dyn crate::cache::Cache>,
    pub sticky: StickyBindings,
    pub adapters: HashMap<Platform, Arc<dyn ProviderAdapter>>,
    pub classify_cfg: ClassifyConfig,
    pub failover_cfg: FailoverConfig,
    pub sticky_reserve_usd: f64,
    pub proxies: HashMap<Uuid, ProxyPoolEntry>,
}

impl DispatchCore {
    pub async fn dispatch(
        &self,
        req: DispatchRequest,
        user: &User,
        api_key: &ApiKey,
        group: &Group,
    ) -> Result<DispatchResult> {
        let begin = self
            .idempotency
            .begin(&req.scope, req.idempotency_key.as_deref(), &req.method, &req.path, &req.raw_body)
            .await?;

        let guard = match begin {
            BeginOutcome::Replay { status, body } => {
                return Ok(DispatchResult::Json { status, body, replayed: true });
            }
            BeginOutcome::Owner(guard) => Some(guard),
            BeginOutcome::Bypassed => None,
        };

        let outcome = self.run_candidate_loop(&req, user, api_key, group).await;

        if let Some(guard) = &guard {
            match &outcome {
                Ok(DispatchResultInner::Buffered { status, body }) => {
                    self.idempotency.complete_success(guard, *status as i32, body).await.ok();
                }
                Ok(DispatchResultInner::Streaming { status, .. }) => {
                    // The upstream body has already been handed off for live
                    // passthrough and can't be replayed verbatim; record a
                    // placeholder so a retried idempotency key replays as a
                    // completed request instead of sitting "processing" until
                    // the timeout window reclaims it.
                    self.idempotency
                        .complete_success(guard, *status as i32, &serde_json::json!({"streamed": true}))
                        .await
                        .ok();
                }
                Err(GatewayError::UpstreamTransient(_))
                | Err(GatewayError::UpstreamRateLimited)
                | Err(GatewayError::UpstreamOverloaded)
                | Err(GatewayError::NoCandidate) => {
                    self.idempotency.complete_retryable_failure(guard, "upstream failover exhausted").await.ok();
                }
                Err(e) => {
                    let (status, _) = e.status_and_code();
                    self.idempotency
                        .complete_non_retryable_failure(guard, status.as_u16() as i32, &e.to_envelope(crate::error::ErrorNamespace::OpenAi))
                        .await
                        .ok();
                }
            }
        }

        outcome.map(|r| match r {
            DispatchResultInner::Buffered { status, body } => DispatchResult::Json { status, body, replayed: false },
            DispatchResultInner::Streaming { status, upstream } => DispatchResult::Stream { status, upstream },
        })
    }

    async fn run_candidate_loop(
        &self,
        req: &DispatchRequest,
        user: &User,
        api_key: &ApiKey,
        group: &Group,
    ) -> Result<DispatchResultInner> {
        let subscription_id = self.billing.check_preflight(user, api_key, group).await?;

        let snapshot = self.scheduler.snapshot.load_full();
        let request_fingerprint = format!("{}:{}", req.session_key.clone().unwrap_or_default(), req.model);

        let adapter = self
            .adapters
            .get(&req.platform)
            .ok_or_else(|| GatewayError::Validation(format!("unsupported platform {:?}", req.platform)))?;

        let upstream_request = UpstreamRequest { model: req.model.clone(), stream: req.stream, body: req.body.clone() };

        // One retry into the group's invalid-request fallback is allowed; a
        // fallback group hitting the same classification again surfaces the
        // error instead of chaining further.
        let mut active_group_id = group.id;
        let mut already_used_fallback = false;
        let result = loop {
            let candidates = select_candidates(
                &snapshot,
                &self.cache,
                &self.sticky,
                active_group_id,
                req.platform,
                &req.model,
                req.session_key.as_deref(),
                &request_fingerprint,
                self.sticky_reserve_usd,
            )
            .await;

            let attempt = failover::run(
                &candidates,
                &snapshot,
                req.platform,
                adapter.as_ref(),
                &self.limiter,
                &self.markers,
                &self.classify_cfg,
                &self.failover_cfg,
                user.id,
                user.concurrency_cap,
                &req.request_id,
                &upstream_request,
                &self.proxies,
                req.session_key.as_deref(),
            )
            .await;

            match attempt {
                Err(GatewayError::FallbackGroupRequested(_)) if !already_used_fallback => {
                    let active_group = snapshot.group(active_group_id);
                    match active_group.and_then(|g| g.fallback_group_id_on_invalid_request) {
                        Some(fallback_id) if snapshot.group(fallback_id).is_some() => {
                            already_used_fallback = true;
                            active_group_id = fallback_id;
                            continue;
                        }
                        _ => break attempt,
                    }
                }
                other => break other,
            }
        }?;

        let account_rate_multiplier = snapshot.account_by_id(result.account_id).map(|a| a.billing_rate_multiplier).unwrap_or(1.0);

        let new_log = |usage: &TokenUsage| UsageLog {
            id: Uuid::new_v4(),
            request_id: req.request_id.clone(),
            user_id: user.id,
            api_key_id: api_key.id,
            account_id: result.account_id,
            group_id: Some(group.id),
            subscription_id: None,
            model: req.model.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_tokens: usage.cache_creation_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cost_usd: 0.0,
            rate_multiplier: group.rate_multiplier,
            account_rate_multiplier: None,
            billing_type: crate::types::BillingType::PayPerToken,
            stream: req.stream,
            duration_ms: 0,
            first_token_ms: None,
            ip_address: None,
            created_at: chrono::Utc::now(),
        };

        match result.response {
            FailoverResponse::Buffered(response) => {
                let usage = TokenUsage {
                    input_tokens: response.usage.input_tokens,
                    output_tokens: response.usage.output_tokens,
                    cache_creation_tokens: response.usage.cache_creation_tokens,
                    cache_read_tokens: response.usage.cache_read_tokens,
                    images: response.usage.images,
                };
                let log = new_log(&usage);
                self.billing
                    .record_usage(log, group, account_rate_multiplier, None, usage, req.platform, subscription_id)
                    .await?;
                Ok(DispatchResultInner::Buffered { status: response.status, body: response.body })
            }
            FailoverResponse::Streaming { status, upstream } => {
                // Token counts for a streamed body only show up in the SSE
                // trailer the client consumes live; record the request now
                // with zero usage so it isn't dropped from the ledger, rather
                // than holding billing open until the stream finishes.
                let usage = TokenUsage::default();
                let log = new_log(&usage);
                self.billing
                    .record_usage(log, group, account_rate_multiplier, None, usage, req.platform, subscription_id)
                    .await?;
                Ok(DispatchResultInner::Streaming { status, upstream })
            }
        }
    }
}

enum DispatchResultInner {
    Buffered { status: u16, body: JsonValue },
    Streaming { status: u16, upstream: reqwest::Response },
}
