//! Failover loop: owned jointly with the scheduler. Attempts
//! each candidate account in order, classifying and marking as it goes, and
//! stops on success, non-retryable classification, or candidate exhaustion.

use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::client_factory::{build_client, resolve_proxy};
use super::protocol::{AttemptResult, ProviderAdapter, UpstreamRequest, UpstreamResponse};
use crate::config::ProxyPoolEntry;
use crate::error::{GatewayError, Result};
use crate::limiter::Limiter;
use crate::ratelimit::{classify, repeated_transient_action, ClassificationAction, ClassifyConfig, MarkerApplier, UpstreamOutcome};
use crate::scheduler::SchedulerSnapshot;
use crate::types::Platform;

/// Either a fully-read response or a live upstream body handed back for SSE
/// passthrough. Billing for the streaming case has to settle for whatever
/// usage figures the caller can derive without consuming the stream itself.
pub enum FailoverResponse {
    Buffered(UpstreamResponse),
    Streaming { status: u16, upstream: reqwest::Response },
}

pub struct FailoverOutcome {
    pub response: FailoverResponse,
    pub account_id: Uuid,
    pub retry_count: u32,
    pub account_switch_count: u32,
}

pub struct FailoverConfig {
    pub max_retries: u32,
    pub repeated_failure_threshold: u32,
    pub response_header_timeout: Duration,
}

/// Runs the ordered candidate list against one provider adapter. Each switch
/// to the next candidate releases the previous account's slot and acquires
/// the next before attempting it.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    candidates: &[Uuid],
    snapshot: &SchedulerSnapshot,
    platform: Platform,
    adapter: &dyn ProviderAdapter,
    limiter: &Limiter,
    markers: &MarkerApplier,
    classify_cfg: &ClassifyConfig,
    failover_cfg: &FailoverConfig,
    user_id: Uuid,
    user_concurrency_cap: u32,
    request_id: &str,
    request: &UpstreamRequest,
    proxies: &HashMap<Uuid, ProxyPoolEntry>,
    session_key: Option<&str>,
) -> Result<FailoverOutcome> {
    if candidates.is_empty() {
        return Err(GatewayError::NoCandidate);
    }

    let mut retry_count = 0u32;
    let mut account_switch_count = 0u32;
    let mut transient_failures: HashMap<Uuid, u32> = HashMap::new();
    let mut last_error: Option<GatewayError> = None;

    for &account_id in candidates {
        if retry_count >= failover_cfg.max_retries {
            break;
        }

        let Some(account) = snapshot.account_by_id(account_id) else { continue };
        if account.platform != platform {
            continue;
        }

        let lease = match limiter
            .acquire(user_id, user_concurrency_cap, account_id, account.scheduling.concurrency_cap, request_id)
            .await
        {
            Ok(lease) => lease,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };

        if uses_session_cap(account) {
            if let Some(session_uuid) = session_key {
                match limiter.register_session(account_id, session_uuid, account.scheduling.concurrency_cap).await {
                    Ok(true) => {}
                    Ok(false) => {
                        limiter.release(&lease).await.ok();
                        last_error = Some(GatewayError::UpstreamTransient("account session limit".into()));
                        continue;
                    }
                    Err(e) => {
                        limiter.release(&lease).await.ok();
                        last_error = Some(e);
                        continue;
                    }
                }
            }
        }

        let proxy_config = resolve_proxy(account.proxy_id, proxies);
        let client = build_client(account, &proxy_config, failover_cfg.response_header_timeout).await?;
        let attempt = adapter.call(&client, account, request).await;
        limiter.release(&lease).await.ok();

        retry_count += 1;
        account_switch_count += 1;

        match attempt {
            Ok(AttemptResult::Success(response)) => {
                markers.apply(account_id, &ClassificationAction::Success).await.ok();
                return Ok(FailoverOutcome {
                    response: FailoverResponse::Buffered(response),
                    account_id,
                    retry_count,
                    account_switch_count,
                });
            }
            Ok(AttemptResult::Streaming { status, upstream }) => {
                markers.apply(account_id, &ClassificationAction::Success).await.ok();
                return Ok(FailoverOutcome {
                    response: FailoverResponse::Streaming { status, upstream },
                    account_id,
                    retry_count,
                    account_switch_count,
                });
            }
            Ok(AttemptResult::Failed(outcome)) => {
                let is_terminal = matches!(outcome, UpstreamOutcome::ClientError { .. });
                let action = classify(&outcome, chrono::Utc::now(), classify_cfg);
                markers.apply(account_id, &action).await.ok();

                if matches!(action, ClassificationAction::FallbackGroup) {
                    return Err(GatewayError::FallbackGroupRequested(
                        "upstream classified the request as invalid for this account's model routing".into(),
                    ));
                }

                if let UpstreamOutcome::Transient { .. } = outcome {
                    let count = transient_failures.entry(account_id).or_insert(0);
                    *count += 1;
                    if *count >= failover_cfg.repeated_failure_threshold {
                        let backoff = repeated_transient_action(chrono::Utc::now(), classify_cfg);
                        markers.apply(account_id, &backoff).await.ok();
                    }
                }

                if is_terminal {
                    return Err(GatewayError::UpstreamClientError {
                        status: match outcome {
                            UpstreamOutcome::ClientError { status } => status,
                            _ => 400,
                        },
                        message: "upstream rejected the request".into(),
                    });
                }
                last_error = Some(outcome_to_error(outcome));
            }
            Err(e) => {
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(GatewayError::NoCandidate))
}

/// The per-account session UUID cap only applies to Anthropic accounts
/// authenticated via OAuth or a setup token; API-key accounts have no
/// session-window concept to cap.
fn uses_session_cap(account: &crate::types::Account) -> bool {
    account.platform == Platform::Anthropic
        && matches!(account.account_type, crate::types::AccountType::Oauth | crate::types::AccountType::SetupToken)
}

fn outcome_to_error(outcome: UpstreamOutcome) -> GatewayError {
    match outcome {
        UpstreamOutcome::Transient { status } => GatewayError::UpstreamTransient(format!("status {status}")),
        UpstreamOutcome::RateLimited { .. } => GatewayError::UpstreamRateLimited,
        UpstreamOutcome::Overloaded => GatewayError::UpstreamOverloaded,
        UpstreamOutcome::AuthInvalid => GatewayError::UpstreamAuthInvalid,
        UpstreamOutcome::ClientError { status } => {
            GatewayError::UpstreamClientError { status, message: "upstream client error".into() }
        }
        UpstreamOutcome::Success | UpstreamOutcome::InvalidRequestModelRouting => {
            GatewayError::Internal("unexpected terminal classification".into())
        }
    }
}
