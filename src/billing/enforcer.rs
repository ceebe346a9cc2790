//! Billing & Subscription Enforcer: pre-flight admission check
//! and post-flight cost accounting.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::cache::SubscriptionCache;
use super::pricing::{compute_cost, PriceTable, TokenUsage};
use super::windows::Window;
use crate::cache::Cache;
use crate::db::{ApiKeyRepository, SubscriptionRepository, UsageLogRepository, UserRepository};
use crate::error::{GatewayError, QuotaError, Result};
use crate::types::{ApiKey, BillingType, Group, SubscriptionStatus, SubscriptionType, UsageLog, User};

pub struct BillingEnforcer {
    users: UserRepository,
    api_keys: ApiKeyRepository,
    subscriptions: SubscriptionRepository,
    usage_logs: UsageLogRepository,
    subscription_cache: SubscriptionCache,
    balance_cache: Arc<dyn Cache>,
    prices: PriceTable,
}

fn balance_cache_key(user_id: Uuid) -> String {
    format!("balance:user:{user_id}")
}

fn usage_cache_key(subscription_id: Uuid) -> String {
    format!("subscription_usage:{subscription_id}")
}

impl BillingEnforcer {
    pub fn new(
        users: UserRepository,
        api_keys: ApiKeyRepository,
        subscriptions: SubscriptionRepository,
        usage_logs: UsageLogRepository,
        subscription_cache: SubscriptionCache,
        balance_cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            users,
            api_keys,
            subscriptions,
            usage_logs,
            subscription_cache,
            balance_cache,
            prices: PriceTable::with_defaults(),
        }
    }

    /// Pre-flight admission. Returns the resolved subscription id
    /// to bill against, or `None` for pay-per-token billing.
    pub async fn check_preflight(&self, user: &User, api_key: &ApiKey, group: &Group) -> Result<Option<Uuid>> {
        if group.subscription_type == SubscriptionType::Standard {
            return self.check_subscription_preflight(user.id, group).await.map(Some);
        }

        if user.balance > 0.0 {
            return Ok(None);
        }
        if api_key.has_quota_headroom() {
            return Ok(None);
        }
        Err(GatewayError::Quota(QuotaError::BalanceExhausted))
    }

    async fn check_subscription_preflight(&self, user_id: Uuid, group: &Group) -> Result<Uuid> {
        let now = Utc::now();
        let cached = self.subscription_cache.get(user_id, group.id).await.ok().flatten();

        let mut subscription = match &cached {
            Some(c) if c.status == SubscriptionStatus::Active && c.expires_at > now => c.clone(),
            _ => {
                let row = self
                    .subscriptions
                    .get_for_user_group(user_id, group.id)
                    .await?
                    .ok_or(GatewayError::Quota(QuotaError::SubscriptionExpired))?;
                row.into_subscription()
                    .ok_or_else(|| GatewayError::Internal("unrecognized subscription status".into()))?
            }
        };

        if subscription.status != SubscriptionStatus::Active || subscription.expires_at <= now {
            return Err(GatewayError::Quota(QuotaError::SubscriptionExpired));
        }

        for (window, limit) in [
            (Window::Daily, group.daily_limit_usd),
            (Window::Weekly, group.weekly_limit_usd),
            (Window::Monthly, group.monthly_limit_usd),
        ] {
            let window_start = match window {
                Window::Daily => subscription.daily_window_start,
                Window::Weekly => subscription.weekly_window_start,
                Window::Monthly => subscription.monthly_window_start,
            };
            if window.needs_reset(window_start, now) {
                let boundary = window.boundary_for(now);
                if self
                    .subscriptions
                    .reset_window(subscription.id, window.column(), boundary, subscription.version)
                    .await?
                {
                    subscription.version += 1;
                    match window {
                        Window::Daily => {
                            subscription.daily_window_start = Some(boundary);
                            subscription.daily_usage_usd = 0.0;
                        }
                        Window::Weekly => {
                            subscription.weekly_window_start = Some(boundary);
                            subscription.weekly_usage_usd = 0.0;
                        }
                        Window::Monthly => {
                            subscription.monthly_window_start = Some(boundary);
                            subscription.monthly_usage_usd = 0.0;
                        }
                    }
                }
            }

            if let Some(limit) = limit {
                let usage = match window {
                    Window::Daily => subscription.daily_usage_usd,
                    Window::Weekly => subscription.weekly_usage_usd,
                    Window::Monthly => subscription.monthly_usage_usd,
                };
                if usage >= limit {
                    return Err(GatewayError::Quota(QuotaError::WindowLimitExceeded(format!(
                        "{} usage limit exceeded",
                        window.column()
                    ))));
                }
            }
        }

        // Skip the write-back when the cached copy we already trusted is at
        // least as fresh as what we're holding now, so a hit path doesn't pay
        // for a redundant round trip to the cache on every request.
        let needs_put = match &cached {
            Some(c) => SubscriptionCache::is_stale(c, &subscription),
            None => true,
        };
        if needs_put {
            self.subscription_cache.put(&subscription).await.ok();
        }
        Ok(subscription.id)
    }

    /// Post-flight accounting.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_usage(
        &self,
        mut log: UsageLog,
        group: &Group,
        account_rate_multiplier: f64,
        apikey_multiplier: Option<f64>,
        usage: TokenUsage,
        model_platform: crate::types::Platform,
        subscription_id: Option<Uuid>,
    ) -> Result<()> {
        let cost = compute_cost(
            &self.prices,
            model_platform,
            &log.model,
            usage,
            group.rate_multiplier,
            account_rate_multiplier,
            apikey_multiplier,
        );
        log.cost_usd = cost;
        log.rate_multiplier = group.rate_multiplier;
        log.account_rate_multiplier = Some(account_rate_multiplier);
        log.subscription_id = subscription_id;
        log.billing_type = if subscription_id.is_some() { BillingType::Subscription } else { BillingType::PayPerToken };

        self.usage_logs.insert(&log).await?;

        match subscription_id {
            Some(sub_id) => self.deduct_subscription(sub_id, cost).await,
            None => {
                self.deduct_pay_per_token(log.user_id, cost).await?;
                if let Err(err) = self.api_keys.increment_quota_used(log.api_key_id, cost).await {
                    tracing::warn!(error = %err, api_key_id = %log.api_key_id, "api key quota increment failed");
                }
                Ok(())
            }
        }
    }

    /// Each window (daily/weekly/monthly) accumulates usage independently
    /// until its own reset, so a single call increments all three.
    async fn deduct_subscription(&self, subscription_id: Uuid, cost: f64) -> Result<()> {
        self.balance_cache.increment_usage(&usage_cache_key(subscription_id), "cost", cost).await?;
        for window in [Window::Daily, Window::Weekly, Window::Monthly] {
            if let Err(err) = self.subscriptions.increment_usage(subscription_id, window.column(), cost).await {
                tracing::warn!(error = %err, subscription_id = %subscription_id, window = window.column(), "subscription usage DB write-through failed, cache is now ahead");
            }
        }
        Ok(())
    }

    async fn deduct_pay_per_token(&self, user_id: Uuid, cost: f64) -> Result<()> {
        let cache_ok = self.balance_cache.deduct_balance(&balance_cache_key(user_id), cost).await?;
        let db_ok = self.users.deduct_balance(user_id, cost).await?;
        if cache_ok && !db_ok {
            tracing::warn!(user_id = %user_id, "balance cache deducted but DB update found insufficient funds, invalidating cache entry");
            self.balance_cache.del(&balance_cache_key(user_id)).await.ok();
        }
        Ok(())
    }
}
