//! Usage log repository: append-only billing record of each completed call.

use super::DbPool;
use crate::types::{BillingType, UsageLog};

fn billing_type_str(t: BillingType) -> &'static str {
    match t {
        BillingType::PayPerToken => "pay_per_token",
        BillingType::Subscription => "subscription",
    }
}

#[derive(Clone)]
pub struct UsageLogRepository {
    pool: DbPool,
}

impl UsageLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, log: &UsageLog) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO usage_logs (
                id, request_id, user_id, api_key_id, account_id, group_id, subscription_id,
                model, input_tokens, output_tokens, cache_creation_tokens, cache_read_tokens,
                cost_usd, rate_multiplier, account_rate_multiplier, billing_type, stream,
                duration_ms, first_token_ms, ip_address, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21
            )
            "#,
        )
        .bind(log.id)
        .bind(&log.request_id)
        .bind(log.user_id)
        .bind(log.api_key_id)
        .bind(log.account_id)
        .bind(log.group_id)
        .bind(log.subscription_id)
        .bind(&log.model)
        .bind(log.input_tokens)
        .bind(log.output_tokens)
        .bind(log.cache_creation_tokens)
        .bind(log.cache_read_tokens)
        .bind(log.cost_usd)
        .bind(log.rate_multiplier)
        .bind(log.account_rate_multiplier)
        .bind(billing_type_str(log.billing_type))
        .bind(log.stream)
        .bind(log.duration_ms)
        .bind(log.first_token_ms)
        .bind(&log.ip_address)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
