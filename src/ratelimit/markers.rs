//! Applies a `ClassificationAction` to account state, both in the persisted
//! row and the in-memory scheduler snapshot so the next selection sees it
//! without waiting on the outbox poll.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::classify::ClassificationAction;
use crate::db::accounts::AccountRepository;
use crate::db::outbox::OutboxRepository;
use crate::error::Result;
use crate::scheduler::Scheduler;

/// Hook a background OAuth refresher registers into, so a quarantined
/// `auth_invalid` account can be handed off for re-authentication instead of
/// sitting quarantined until the long backoff expires.
#[async_trait]
pub trait AuthRefreshHook: Send + Sync {
    async fn on_auth_invalid(&self, account_id: Uuid);
}

/// Default hook: appends an `auth_invalidated` row to the scheduling outbox.
/// An out-of-process OAuth refresher polling the same outbox table picks
/// this up the same way gateway replicas pick up scheduling deltas; the
/// scheduler itself ignores the kind since it isn't one of its own deltas.
pub struct OutboxAuthRefreshHook {
    outbox: OutboxRepository,
}

impl OutboxAuthRefreshHook {
    pub fn new(outbox: OutboxRepository) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl AuthRefreshHook for OutboxAuthRefreshHook {
    async fn on_auth_invalid(&self, account_id: Uuid) {
        if let Err(err) = self.outbox.append(account_id, "auth_invalidated").await {
            tracing::warn!(error = %err, account_id = %account_id, "failed to append auth_invalidated outbox event");
        }
    }
}

pub struct MarkerApplier {
    accounts: AccountRepository,
    scheduler: Arc<Scheduler>,
    auth_refresh_hook: Option<Arc<dyn AuthRefreshHook>>,
}

impl MarkerApplier {
    pub fn new(accounts: AccountRepository, scheduler: Arc<Scheduler>) -> Self {
        Self { accounts, scheduler, auth_refresh_hook: None }
    }

    pub fn with_auth_refresh_hook(mut self, hook: Arc<dyn AuthRefreshHook>) -> Self {
        self.auth_refresh_hook = Some(hook);
        self
    }

    /// Persists the classification outcome for `account_id` and applies it
    /// to the live snapshot immediately (the background outbox poll will
    /// also pick this up, but that would race the next candidate selection).
    pub async fn apply(&self, account_id: Uuid, action: &ClassificationAction) -> Result<()> {
        match action {
            ClassificationAction::Success => {
                self.accounts.clear_rate_limit(account_id).await?;
                self.accounts.update_last_used(account_id, Utc::now()).await?;
            }
            ClassificationAction::Quarantine { until, reason } => {
                self.accounts.set_error(account_id, reason, *until).await?;
                if *reason == "auth_invalid" {
                    if let Some(hook) = &self.auth_refresh_hook {
                        hook.on_auth_invalid(account_id).await;
                    }
                }
            }
            ClassificationAction::Failover => {
                // transient single-shot failure: no persisted marker, caller just
                // advances to the next candidate.
            }
            ClassificationAction::FailoverWithShortBackoff { until, reason } => {
                self.accounts.set_temp_unschedulable(account_id, *until, reason).await?;
            }
            ClassificationAction::RateLimited { reset_at } => {
                self.accounts.set_rate_limited(account_id, *reset_at).await?;
            }
            ClassificationAction::Overloaded { until } => {
                self.accounts.set_overloaded(account_id, *until).await?;
            }
            ClassificationAction::Terminal { .. } => {
                // caller surfaces the error to the requester; no account-side marker.
            }
            ClassificationAction::FallbackGroup => {
                // re-dispatch into fallback_group_id_on_invalid_request happens in
                // dispatch.rs's candidate loop; this account isn't mutated.
            }
        }

        if let Some(row) = self.accounts.get_by_id(account_id).await? {
            if let Some(account) = row.into_account() {
                self.scheduler.apply_account_update(account);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn success_action_maps_to_no_persisted_marker_branch() {
        // Success/Failover/Terminal/FallbackGroup all skip the repository
        // write; this just documents that `apply` is exhaustive over the
        // action enum so new variants can't silently no-op.
        let action = ClassificationAction::RateLimited { reset_at: Utc::now() + Duration::seconds(30) };
        match action {
            ClassificationAction::RateLimited { .. } => {}
            _ => panic!("unexpected"),
        }
    }
}
